//! The `run` command: JSON lines in, outbound actions out.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, BufReader};

use bl_domain::config::{Config, ConfigSeverity};
use bl_domain::event::InboundEvent;
use bl_sessions::{Dispatcher, Invocation};

use crate::outbound::StdoutOutbound;
use crate::plugins;

/// Decode one input line.  Blank lines yield `None`.  Events without a
/// bot ID get `default_bot`.
pub fn parse_event(line: &str, default_bot: Option<u64>) -> anyhow::Result<Option<InboundEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut event: InboundEvent = serde_json::from_str(line).context("decoding inbound event")?;
    if event.bot_id == 0 {
        if let Some(bot_id) = default_bot {
            event.bot_id = bot_id;
        }
    }
    Ok(Some(event))
}

/// Log every config issue; fail when any of them is an error.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    check_config(&config)?;
    let dispatcher = Dispatcher::new(&config, Arc::new(StdoutOutbound::new()));
    plugins::register_all(&dispatcher);
    for receiver in dispatcher.receivers() {
        let info = receiver.info();
        tracing::info!(receiver = %info.name, usage = %info.usage, "plugin loaded");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Vec<Invocation> = Vec::new();
    let mut line_no = 0usize;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else { break };
        line_no += 1;

        let event = match parse_event(&line, config.dispatch.bot_id) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(line = line_no, error = %format!("{e:#}"), "skipping malformed input");
                continue;
            }
        };

        for outcome in dispatcher.dispatch_and_wait(event).await {
            if let Some(inv) = outcome.invocation() {
                pending.push(inv.clone());
            }
        }
        pending.retain(|inv| !inv.is_finished());
    }

    tracing::info!(pending = pending.len(), "input closed, waiting for open conversations");
    tokio::select! {
        _ = async {
            for inv in &pending {
                inv.finished().await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_domain::event::EventKind;

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_event("   ", None).unwrap().is_none());
    }

    #[test]
    fn missing_bot_id_is_stamped() {
        let ev = parse_event(
            r#"{"kind": "group", "group_id": 42, "sender_id": 7, "text": "查询"}"#,
            Some(10001),
        )
        .unwrap()
        .unwrap();
        assert_eq!(ev.bot_id, 10001);
        assert_eq!(ev.kind, EventKind::Group);
        assert_eq!(ev.text, "查询");
    }

    #[test]
    fn explicit_bot_id_wins() {
        let ev = parse_event(r#"{"bot_id": 5, "kind": "friend", "sender_id": 7}"#, Some(10001))
            .unwrap()
            .unwrap();
        assert_eq!(ev.bot_id, 5);
    }

    #[test]
    fn zero_blocking_workers_refuses_to_start() {
        let mut config = Config::default();
        config.dispatch.blocking_workers = 0;
        let err = check_config(&config).unwrap_err();
        assert_eq!(err.to_string(), "config validation failed with 1 error(s)");
    }

    #[test]
    fn warnings_do_not_block_startup() {
        let mut config = Config::default();
        config.sessions.expiration_secs = 5;
        assert!(check_config(&config).is_ok());
    }

    #[tokio::test]
    async fn run_rejects_invalid_config_before_reading_input() {
        let mut config = Config::default();
        config.sessions.default_timeout_secs = 0;
        assert!(run(Arc::new(config)).await.is_err());
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_event("{not json", None).unwrap_err();
        assert!(format!("{err:#}").starts_with("decoding inbound event"));
    }
}
