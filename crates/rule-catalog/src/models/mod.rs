//! 规则目录数据模型

mod dictionary;
mod enums;
mod event;
mod rule;
mod view;

use serde::{Deserialize, Serialize};

pub use dictionary::*;
pub use enums::*;
pub use event::*;
pub use rule::*;
pub use view::*;

/// 已通过身份校验的操作者
///
/// 目录只按角色做授权判断，不负责认证。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    pub fn maker(username: impl Into<String>) -> Self {
        Self::new(username, Role::Maker)
    }

    pub fn checker(username: impl Into<String>) -> Self {
        Self::new(username, Role::Checker)
    }
}
