//! 业务指标
//!
//! 基于 `metrics` facade 记录命令与评估指标，未安装 recorder 时记录为空操作。

use std::time::Duration;

pub const RULE_COMMANDS_TOTAL: &str = "rule_commands_total";
pub const RULE_EVALUATIONS_TOTAL: &str = "rule_evaluations_total";
pub const RULE_EVALUATION_DURATION_SECONDS: &str = "rule_evaluation_duration_seconds";

/// 注册指标描述
pub fn describe() {
    metrics::describe_counter!(
        RULE_COMMANDS_TOTAL,
        "Total number of catalog commands by command and outcome"
    );
    metrics::describe_counter!(
        RULE_EVALUATIONS_TOTAL,
        "Total number of per-record rule evaluations by outcome"
    );
    metrics::describe_histogram!(
        RULE_EVALUATION_DURATION_SECONDS,
        "Evaluation batch duration in seconds"
    );
}

/// 记录一次命令执行
pub fn record_command(command: &'static str, outcome: &'static str) {
    metrics::counter!(RULE_COMMANDS_TOTAL, "command" => command, "outcome" => outcome).increment(1);
}

/// 记录单条记录的评估结果（matched / unmatched）
pub fn record_evaluation(outcome: &'static str) {
    metrics::counter!(RULE_EVALUATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// 记录评估批次耗时
pub fn record_evaluation_duration(elapsed: Duration) {
    metrics::histogram!(RULE_EVALUATION_DURATION_SECONDS).record(elapsed.as_secs_f64());
}
