//! Rendering of register values and memory dumps for the editor.

use serde::Deserialize;

/// Base used to display register values. Every base has a fixed width,
/// values are shown as 32-bit words regardless of their magnitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterFormat {
    #[default]
    Hex,
    Oct,
    Bin,
    Dec,
}

impl RegisterFormat {
    pub fn render(self, value: i64) -> String {
        // registers are 32-bit words, negative values show their two's complement
        let word = value as u32;
        match self {
            RegisterFormat::Hex => format!("0x{word:08x}"),
            RegisterFormat::Oct => format!("0o{word:011o}"),
            RegisterFormat::Bin => format!("0b{word:032b}"),
            RegisterFormat::Dec => format!("{word:010}"),
        }
    }
}

/// One line of a memory region dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub name: String,
    pub value: String,
}

/// Split a textual memory dump into rows. A row name is everything before the
/// first double space, the value is the remainder.
pub fn memory_rows(dump: &str) -> Vec<MemoryRow> {
    dump.split('\n')
        .map(|row| {
            let (name, value) = row.split_once("  ").unwrap_or((row, ""));
            MemoryRow {
                name: name.to_string(),
                value: value.trim_start().to_string(),
            }
        })
        .collect()
}
