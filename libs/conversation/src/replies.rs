use std::fmt::Display;

use hops_core::{Action, ValidationError};

pub const NOT_AUTHORIZED: &str = "无权限：该账号未加入白名单。";
pub const UNSUPPORTED_MESSAGE: &str = "暂不支持的消息类型。";
pub const UNSUPPORTED_EVENT: &str = "暂不支持的操作。";
pub const ENTRY_PROMPT: &str = "请输入“容器”打开操作菜单。";
pub const SESSION_EXPIRED: &str = "会话已过期，请输入“容器”重新开始。";
pub const CANCELLED: &str = "已取消。";

pub fn action_selected(action: Action) -> String {
    format!("已选择动作：{}\n请输入容器名：", action.display_name())
}

pub fn invalid_parameter(err: &ValidationError) -> String {
    format!("容器名不合法：{err}")
}

pub fn action_succeeded(elapsed_ms: u64, action: Action, target: &str) -> String {
    format!(
        "执行成功（{elapsed_ms}ms）：{} {target}",
        action.display_name()
    )
}

pub fn action_failed(elapsed_ms: u64, err: impl Display) -> String {
    format!("执行失败（{elapsed_ms}ms）：{err:#}")
}
