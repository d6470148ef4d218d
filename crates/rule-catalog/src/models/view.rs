//! 读取投影与分页

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::dictionary::{ParameterDef, TagDef};
use super::rule::{Rule, RuleDraft, RuleGroup};

/// 规则所属规则组摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroupRef {
    pub name: String,
    pub execution_type: String,
}

impl From<&RuleGroup> for RuleGroupRef {
    fn from(group: &RuleGroup) -> Self {
        Self {
            name: group.name.clone(),
            execution_type: group.execution_type.clone(),
        }
    }
}

/// 规则版本及其关联的参数、标签
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: Rule,
    pub rule_group: RuleGroupRef,
    pub parameters: Vec<ParameterDef>,
    pub tags: Vec<TagDef>,
}

impl RuleView {
    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }
}

/// 草稿及其关联的草稿字典项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftView {
    #[serde(flatten)]
    pub draft: RuleDraft,
    pub parameters: Vec<ParameterDef>,
    pub tags: Vec<TagDef>,
}

/// 分页请求
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct PageRequest {
    #[validate(range(min = 1, max = 1_000_000, message = "页码必须在1-1000000之间"))]
    pub page: i64,
    #[validate(range(min = 1, max = 100, message = "每页数量必须在1-100之间"))]
    pub page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0).saturating_mul(self.page_size)
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: &PageRequest) -> Self {
        let total_pages = if request.page_size > 0 {
            (total + request.page_size - 1) / request.page_size
        } else {
            0
        };

        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages,
        }
    }

    pub fn empty(request: &PageRequest) -> Self {
        Self::new(Vec::new(), 0, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_total_pages_calculation() {
        let request = PageRequest::new(1, 10);

        // 恰好整除
        assert_eq!(Page::<i32>::new(vec![], 100, &request).total_pages, 10);
        // 有余数
        assert_eq!(Page::<i32>::new(vec![], 101, &request).total_pages, 11);
        // 空数据
        assert_eq!(Page::<i32>::empty(&request).total_pages, 0);
    }

    #[test]
    fn test_page_request_offset_and_validation() {
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
        assert_eq!(PageRequest::default().offset(), 0);

        assert!(PageRequest::new(0, 10).validate().is_err());
        assert!(PageRequest::new(1, 101).validate().is_err());
        assert!(PageRequest::new(2, 100).validate().is_ok());
    }

    #[test]
    fn test_page_request_rejects_huge_page() {
        let request = PageRequest::new(i64::MAX, 100);
        assert!(request.validate().is_err());
        assert_eq!(request.offset(), i64::MAX);
        assert!(PageRequest::new(1_000_000, 100).validate().is_ok());
    }
}
