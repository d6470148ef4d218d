//! 参数与标签字典
//!
//! 字典行按名称全局唯一，被多条规则/草稿通过映射表共享。
//! 每行携带 revision，修改已有定义时用于乐观并发校验。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use super::enums::DataType;
use crate::error::{CatalogError, Result};

/// 字典作用域：草稿字典或正式字典
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictionaryScope {
    Draft,
    Catalog,
}

/// 映射表描述：表名、归属列、字典列
#[derive(Debug, Clone, Copy)]
pub struct MapTable {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub target_column: &'static str,
}

impl DictionaryScope {
    pub fn parameter_table(&self) -> &'static str {
        match self {
            Self::Draft => "rule_parameter_drafts",
            Self::Catalog => "rule_parameters",
        }
    }

    pub fn tag_table(&self) -> &'static str {
        match self {
            Self::Draft => "rule_tags_drafts",
            Self::Catalog => "rule_tags",
        }
    }

    pub fn parameter_map(&self) -> MapTable {
        match self {
            Self::Draft => MapTable {
                table: "rule_parameter_draft_map",
                owner_column: "rule_draft_id",
                target_column: "parameter_draft_id",
            },
            Self::Catalog => MapTable {
                table: "rule_parameter_map",
                owner_column: "rule_id",
                target_column: "parameter_id",
            },
        }
    }

    pub fn tag_map(&self) -> MapTable {
        match self {
            Self::Draft => MapTable {
                table: "rule_tag_draft_map",
                owner_column: "rule_draft_id",
                target_column: "tag_draft_id",
            },
            Self::Catalog => MapTable {
                table: "rule_tags_map",
                owner_column: "rule_id",
                target_column: "tag_id",
            },
        }
    }
}

/// 参数定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ParameterDef {
    pub id: i64,
    pub name: String,
    pub data_type: DataType,
    pub description: String,
    pub is_required: bool,
    #[sqlx(default)]
    pub default_value: Option<Value>,
    pub revision: i32,
}

/// 标签定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TagDef {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub revision: i32,
}

/// 调用方提交的参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ParameterInput {
    #[validate(length(min = 1, max = 100, message = "参数名称长度必须在1-100个字符之间"))]
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    /// 修改已有定义时期望的当前 revision
    #[serde(default)]
    pub expected_revision: Option<i32>,
}

impl ParameterInput {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: None,
            is_required: false,
            default_value: None,
            expected_revision: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn expecting_revision(mut self, revision: i32) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    /// 校验并规范化数据类型
    pub fn resolve(&self) -> Result<ParameterSpec> {
        self.validate()?;
        let data_type = DataType::parse(&self.data_type).ok_or_else(|| {
            CatalogError::Validation(format!(
                "参数 {} 的数据类型无效: {}（可选 STRING/INT/FLOAT/BOOLEAN/DATE）",
                self.name, self.data_type
            ))
        })?;

        Ok(ParameterSpec {
            name: self.name.trim().to_string(),
            data_type,
            description: self.description.clone().unwrap_or_default(),
            is_required: self.is_required,
            default_value: self.default_value.clone(),
            expected_revision: self.expected_revision,
        })
    }
}

/// 调用方提交的标签
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TagInput {
    #[validate(length(min = 1, max = 100, message = "标签名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expected_revision: Option<i32>,
}

impl TagInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            expected_revision: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn resolve(&self) -> Result<TagSpec> {
        self.validate()?;
        Ok(TagSpec {
            name: self.name.trim().to_string(),
            description: self.description.clone().unwrap_or_default(),
            expected_revision: self.expected_revision,
        })
    }
}

/// 丢弃名称为空白的标签
pub fn non_blank_tags(tags: &[TagInput]) -> Vec<TagInput> {
    tags.iter()
        .filter(|t| !t.name.trim().is_empty())
        .cloned()
        .collect()
}

/// 校验后的参数定义
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub data_type: DataType,
    pub description: String,
    pub is_required: bool,
    pub default_value: Option<Value>,
    pub expected_revision: Option<i32>,
}

impl ParameterSpec {
    pub fn same_definition(&self, existing: &ParameterDef) -> bool {
        self.data_type == existing.data_type
            && self.description == existing.description
            && self.is_required == existing.is_required
            && self.default_value == existing.default_value
    }
}

/// 草稿字典提升到正式字典时不携带 revision（两套字典各自计数）
impl From<&ParameterDef> for ParameterSpec {
    fn from(def: &ParameterDef) -> Self {
        Self {
            name: def.name.clone(),
            data_type: def.data_type,
            description: def.description.clone(),
            is_required: def.is_required,
            default_value: def.default_value.clone(),
            expected_revision: None,
        }
    }
}

/// 校验后的标签定义
#[derive(Debug, Clone, PartialEq)]
pub struct TagSpec {
    pub name: String,
    pub description: String,
    pub expected_revision: Option<i32>,
}

impl TagSpec {
    pub fn same_definition(&self, existing: &TagDef) -> bool {
        self.description == existing.description
    }
}

impl From<&TagDef> for TagSpec {
    fn from(def: &TagDef) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            expected_revision: None,
        }
    }
}

/// 已存在字典行的写入决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertDecision {
    /// 定义未变化，沿用原行，不递增 revision
    Keep,
    /// 覆盖定义并递增 revision
    Update,
}

/// 判断对已存在字典行的写入是否允许
///
/// `strict` 为 true 时，修改定义必须携带 expected_revision；
/// 为 false 时退化为后写覆盖。
pub fn decide_upsert(
    name: &str,
    current_revision: i32,
    unchanged: bool,
    expected_revision: Option<i32>,
    strict: bool,
) -> Result<UpsertDecision> {
    if let Some(expected) = expected_revision
        && expected != current_revision
    {
        return Err(CatalogError::Conflict(format!(
            "字典项 {name} 已被修改: 期望 revision {expected}，当前 {current_revision}"
        )));
    }

    if unchanged {
        return Ok(UpsertDecision::Keep);
    }

    if expected_revision.is_none() && strict {
        return Err(CatalogError::Conflict(format!(
            "修改已有字典项 {name} 需要提供 expected_revision（当前 {current_revision}）"
        )));
    }

    Ok(UpsertDecision::Update)
}
