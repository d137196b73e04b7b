// ── Card-log replay ──
//
// Re-sends a recorded card log through a reader session, one record at a
// time. An operator steps through the records and can inject reader state
// changes in between, or let the rest of the log run through unattended.

use std::io::BufRead;

use chrono::{DateTime, FixedOffset, Local};
use oolive_api::{CardReaderEntry, EntryType};
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::session::ReaderSessionClient;
use crate::error::ReplayError;

/// What the operator asked for at a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCommand {
    Quit,
    /// Send every remaining record without asking again.
    SendAll,
    Connected,
    Disconnected,
    /// Announce the card of the next record as inserted.
    Inserted,
    Removed,
    /// Send the next record.
    Next,
}

impl ReplayCommand {
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "q" => Self::Quit,
            "a" => Self::SendAll,
            "c" => Self::Connected,
            "d" => Self::Disconnected,
            "i" => Self::Inserted,
            "r" => Self::Removed,
            _ => Self::Next,
        }
    }
}

/// Source of operator commands.
pub trait ReplayPrompt {
    fn next_command(&mut self) -> Result<ReplayCommand, ReplayError>;
}

/// Asks on the terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl ReplayPrompt for TerminalPrompt {
    fn next_command(&mut self) -> Result<ReplayCommand, ReplayError> {
        let input: String = dialoguer::Input::new()
            .with_prompt("Continue? [q/a/c/d/i/r]")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| ReplayError::Prompt(e.to_string()))?;
        Ok(ReplayCommand::parse(&input))
    }
}

/// Counts of what a replay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub sent: usize,
    pub remaining: usize,
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Parse and check one log line.
fn parse_record(line: &str, line_no: usize) -> Result<CardReaderEntry, ReplayError> {
    let entry: CardReaderEntry =
        serde_json::from_str(line).map_err(|e| ReplayError::InvalidRecord {
            line: line_no,
            reason: e.to_string(),
        })?;
    entry.validate().map_err(|e| ReplayError::InvalidRecord {
        line: line_no,
        reason: e.to_string(),
    })?;
    Ok(entry)
}

/// Replay the card log in `reader`. Blocking: call from a blocking thread.
///
/// Every record is validated before it is sent; an invalid record aborts
/// the replay with [`ReplayError::InvalidRecord`].
pub fn replay<R: BufRead, P: ReplayPrompt>(
    reader: R,
    prompt: &mut P,
    session: &ReaderSessionClient,
    runtime: &Handle,
) -> Result<ReplaySummary, ReplayError> {
    let set_state = |entry_type: EntryType, card: Option<String>| {
        let reply = runtime.block_on(session.set_state(entry_type, now(), card));
        info!(%entry_type, ?reply, "state announced");
    };

    let mut records = reader
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.as_ref().is_ok_and(|l| l.trim().is_empty()))
        .peekable();
    let mut summary = ReplaySummary::default();
    let mut send_all = false;

    set_state(EntryType::ReaderConnected, None);

    loop {
        let Some((line_no, line)) = records.peek() else {
            break;
        };
        let line_no = *line_no;
        let line = match line {
            Ok(line) => line.clone(),
            Err(e) => return Err(ReplayError::Io(std::io::Error::new(e.kind(), e.to_string()))),
        };

        let command = if send_all {
            ReplayCommand::Next
        } else {
            prompt.next_command()?
        };

        match command {
            ReplayCommand::Quit => break,
            ReplayCommand::SendAll => send_all = true,
            ReplayCommand::Connected => set_state(EntryType::ReaderConnected, None),
            ReplayCommand::Disconnected => set_state(EntryType::ReaderDisconnected, None),
            ReplayCommand::Inserted => {
                let card = parse_record(&line, line_no)?.control_card;
                if card.is_none() {
                    warn!(line = line_no, "next record carries no card number");
                }
                set_state(EntryType::CardInserted, card);
            }
            ReplayCommand::Removed => set_state(EntryType::CardRemoved, None),
            ReplayCommand::Next => {
                let entry = parse_record(&line, line_no)?;
                records.next();
                info!(
                    line = line_no,
                    card = entry.control_card.as_deref().unwrap_or_default(),
                    entry_type = %entry.entry_type,
                    "replaying record"
                );
                let reply = runtime.block_on(session.send_and_receive(&entry, None));
                info!(?reply, "server reply");
                summary.sent += 1;
            }
        }
    }

    summary.remaining = records.count();
    Ok(summary)
}
