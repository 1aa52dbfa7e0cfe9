//! Append-only JSON-lines trade journal (§6 persisted state). One line per
//! `ExecutionResult`; nothing is ever read back for resume, so this is a
//! plain append, no compaction or indexing.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::types::ExecutionResult;

pub struct TradeJournal {
    writer: Mutex<BufWriter<File>>,
}

impl TradeJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("opening trade journal at {}", path.as_ref().display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Appends one `ExecutionResult` as a single JSON line, flushing
    /// immediately so a crash right after an execution doesn't lose the
    /// record.
    pub fn append(&self, result: &ExecutionResult) -> Result<()> {
        let line = serde_json::to_string(result).context("serializing execution result")?;
        let mut writer = self.writer.lock().expect("journal writer mutex poisoned");
        writeln!(writer, "{line}").context("writing journal line")?;
        writer.flush().context("flushing journal")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::types::LegResult;
    use rust_decimal_macros::dec;
    use std::io::{BufRead, BufReader};

    #[test]
    fn append_writes_one_line_per_result() {
        let dir = std::env::temp_dir().join(format!("arb-journal-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trades.jsonl");
        let _ = std::fs::remove_file(&path);

        let journal = TradeJournal::open(&path).unwrap();
        let result = ExecutionResult {
            path_name: "usdt_btc_usdc".into(),
            stake: dec!(6000),
            legs: vec![LegResult::not_attempted("BTC-USDT", dec!(6000))],
            realized_profit: dec!(34),
            success: true,
            error: None,
        };
        journal.append(&result).unwrap();
        journal.append(&result).unwrap();

        let file = File::open(&path).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("usdt_btc_usdc"));
    }
}
