//! 条件评估器
//!
//! 实现各操作符的比较逻辑。字段缺失时任何操作符都返回 false，
//! 类型不兼容时返回 `TypeMismatch` 错误，由调用方决定如何处理。

use crate::error::{Result, RuleError};
use crate::models::type_name;
use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件
    ///
    /// # Arguments
    /// * `field_value` - 从事实中解析出的值
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中的比较值（已解析事实引用）
    pub fn evaluate(
        field_value: Option<&Value>,
        operator: Operator,
        expected_value: &Value,
    ) -> Result<bool> {
        // 缺失值不参与任何比较，包括否定类操作符
        let field_value = match field_value {
            Some(v) => v,
            None => return Ok(false),
        };

        match operator {
            Operator::Equal => Ok(Self::eq(field_value, expected_value)),
            Operator::NotEqual => Ok(!Self::eq(field_value, expected_value)),
            Operator::GreaterThan => Self::compare(field_value, expected_value, |a, b| a > b),
            Operator::GreaterThanInclusive => {
                Self::compare(field_value, expected_value, |a, b| a >= b)
            }
            Operator::LessThan => Self::compare(field_value, expected_value, |a, b| a < b),
            Operator::LessThanInclusive => Self::compare(field_value, expected_value, |a, b| a <= b),
            Operator::In => Self::in_list(field_value, expected_value),
            Operator::NotIn => Self::in_list(field_value, expected_value).map(|r| !r),
            Operator::Contains => Self::contains(field_value, expected_value),
            Operator::DoesNotContain => Self::contains(field_value, expected_value).map(|r| !r),
            Operator::StartsWith => Self::starts_with(field_value, expected_value),
            Operator::EndsWith => Self::ends_with(field_value, expected_value),
            Operator::Regex => Self::regex_match(field_value, expected_value),
            Operator::Before => Self::time_compare(field_value, expected_value, |a, b| a < b),
            Operator::After => Self::time_compare(field_value, expected_value, |a, b| a > b),
        }
    }

    /// 相等比较
    fn eq(field: &Value, expected: &Value) -> bool {
        // 数值统一按浮点比较，避免 100 与 100.0、"100" 与 100 比较失败
        if let (Some(f1), Some(f2)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return (f1 - f2).abs() < f64::EPSILON;
        }

        field == expected
    }

    /// 数值比较
    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        let field_num = Self::as_f64(field).ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: type_name(field).to_string(),
        })?;

        let expected_num = Self::as_f64(expected).ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: type_name(expected).to_string(),
        })?;

        Ok(cmp(field_num, expected_num))
    }

    /// 集合成员检查 (in)
    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected
            .as_array()
            .ok_or_else(|| RuleError::TypeMismatch {
                expected: "array".to_string(),
                actual: type_name(expected).to_string(),
            })?;

        Ok(arr.iter().any(|item| Self::eq(field, item)))
    }

    /// 字符串子串或数组元素包含检查
    fn contains(field: &Value, expected: &Value) -> Result<bool> {
        match field {
            Value::String(s) => {
                let substr = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
                    expected: "string".to_string(),
                    actual: type_name(expected).to_string(),
                })?;
                Ok(s.contains(substr))
            }
            Value::Array(arr) => Ok(arr.iter().any(|item| Self::eq(item, expected))),
            _ => Err(RuleError::InvalidOperator {
                operator: Operator::Contains.to_string(),
                value_type: type_name(field).to_string(),
            }),
        }
    }

    /// 字符串前缀检查
    fn starts_with(field: &Value, expected: &Value) -> Result<bool> {
        let (s, prefix) = Self::both_str(field, expected)?;
        Ok(s.starts_with(prefix))
    }

    /// 字符串后缀检查
    fn ends_with(field: &Value, expected: &Value) -> Result<bool> {
        let (s, suffix) = Self::both_str(field, expected)?;
        Ok(s.ends_with(suffix))
    }

    /// 正则表达式匹配
    fn regex_match(field: &Value, expected: &Value) -> Result<bool> {
        let (s, pattern) = Self::both_str(field, expected)?;

        // 规则编译阶段已预校验，此处失败说明规则未经校验直接执行
        let regex = Regex::new(pattern).map_err(|e| {
            RuleError::ParseError(format!("无效的正则表达式 '{}': {}", pattern, e))
        })?;

        Ok(regex.is_match(s))
    }

    fn both_str<'a>(field: &'a Value, expected: &'a Value) -> Result<(&'a str, &'a str)> {
        let s = field.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string".to_string(),
            actual: type_name(field).to_string(),
        })?;

        let other = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string".to_string(),
            actual: type_name(expected).to_string(),
        })?;

        Ok((s, other))
    }

    /// 时间比较
    fn time_compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    {
        let field_time = Self::parse_datetime(field)?;
        let expected_time = Self::parse_datetime(expected)?;

        Ok(cmp(field_time, expected_time))
    }

    /// 解析日期时间，支持 RFC 3339 与 YYYY-MM-DD
    fn parse_datetime(value: &Value) -> Result<DateTime<Utc>> {
        let s = value.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "datetime string".to_string(),
            actual: type_name(value).to_string(),
        })?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .ok_or_else(|| RuleError::ParseError(format!("无法解析日期时间: '{}'", s)))
    }

    /// 尝试将 Value 转换为 f64
    /// 只接受有限数值，"NaN"、"inf" 之类的文本按普通字符串处理
    fn as_f64(value: &Value) -> Option<f64> {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        number.filter(|f: &f64| f.is_finite())
    }
}
