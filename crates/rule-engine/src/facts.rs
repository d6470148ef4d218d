//! 事实对象与路径解析
//!
//! 路径支持三种写法：`$.a.b[0].c`、`a.b.0.c`、`a.b[0].c`，也支持 `['key']` 形式的带引号键名。

use crate::error::{Result, RuleError};
use serde_json::Value;

/// 路径片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// 解析路径表达式
pub fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let trimmed = path.trim();
    let body = trimmed.strip_prefix('$').unwrap_or(trimmed);

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => flush_key(&mut current, &mut segments),
            '[' => {
                flush_key(&mut current, &mut segments);
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(RuleError::ParseError(format!("路径括号未闭合: '{}'", path)));
                }
                segments.push(bracket_segment(inner.trim(), path)?);
            }
            _ => current.push(c),
        }
    }
    flush_key(&mut current, &mut segments);

    Ok(segments)
}

fn flush_key(current: &mut String, segments: &mut Vec<Segment>) {
    if !current.is_empty() {
        segments.push(Segment::Key(std::mem::take(current)));
    }
}

fn bracket_segment(inner: &str, path: &str) -> Result<Segment> {
    let quoted = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));

    if let Some(key) = quoted {
        return Ok(Segment::Key(key.to_string()));
    }

    inner
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| RuleError::ParseError(format!("无效的路径下标 '{}': '{}'", inner, path)))
}

/// 沿路径查找值，任一片段缺失时返回 None
pub fn lookup<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key)?,
            (Value::Array(arr), Segment::Index(i)) => arr.get(*i)?,
            // 数组上的数字键视为下标，如 "items.0.name"
            (Value::Array(arr), Segment::Key(key)) => arr.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// 事实对象
#[derive(Debug, Clone, Default)]
pub struct Facts {
    data: Value,
}

impl Facts {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 按事实名取值
    ///
    /// 优先按完整键名查找；找不到时把事实名当作路径，首段必须存在。
    /// 返回 `Err(FactNotFound)` 表示事实本身不存在，`Ok(None)` 表示路径在事实内部未命中。
    pub fn fact(&self, name: &str) -> Result<Option<&Value>> {
        if let Some(value) = self.data.get(name) {
            return Ok(Some(value));
        }

        let segments = parse_path(name)?;
        let Some((first, rest)) = segments.split_first() else {
            return Err(RuleError::FactNotFound(name.to_string()));
        };
        let head = match first {
            Segment::Key(key) => self.data.get(key),
            Segment::Index(_) => None,
        }
        .ok_or_else(|| RuleError::FactNotFound(name.to_string()))?;

        Ok(lookup(head, rest))
    }

    /// 取事实并继续沿 `path` 深入
    pub fn resolve(&self, name: &str, path: Option<&str>) -> Result<Option<&Value>> {
        let Some(value) = self.fact(name)? else {
            return Ok(None);
        };
        match path {
            None => Ok(Some(value)),
            Some(p) => Ok(lookup(value, &parse_path(p)?)),
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_inner(self) -> Value {
        self.data
    }
}

impl From<Value> for Facts {
    fn from(data: Value) -> Self {
        Self::new(data)
    }
}
