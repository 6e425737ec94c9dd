// Legacy text-blob journal format.
//
// Older clients saved journals as plain text. This adapter turns a blob into
// structured entries; the aggregator never sees text. Blocks are separated by
// blank lines, one `key: value` per line:
//
//   date: 2024-01-05
//   time: evening
//   emotions: angry, frustrated
//   intensity: 4
//   trigger: my brother took my toy
//   coping: counted to ten
//   improve: ask for help sooner
//
// date, time, emotions and intensity are required. Keys are case-insensitive.

use crate::calendar::DateKey;
use crate::error::ValidationError;
use crate::journal::TimeOfDay;
use crate::JournalEntry;

#[derive(Default)]
struct BlockFields {
    date: Option<DateKey>,
    time: Option<TimeOfDay>,
    emotions: Option<Vec<String>>,
    intensity: Option<u8>,
    trigger: String,
    coping: String,
    improve: String,
}

fn missing(field: &str, block: usize) -> ValidationError {
    ValidationError::MalformedPayload(format!("entry {}: missing {}", block, field))
}

/// Parse every block of `text` into validated entries for `child_id`
pub fn parse_journal_text(child_id: &str, text: &str) -> Result<Vec<JournalEntry>, ValidationError> {
    let mut entries = Vec::new();
    let mut current: Option<BlockFields> = None;

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            if let Some(fields) = current.take() {
                entries.push(finish_block(child_id, fields, entries.len() + 1)?);
            }
            continue;
        }

        let (key, value) = line.split_once(':').ok_or_else(|| {
            ValidationError::MalformedPayload(format!("line {}: expected 'key: value'", line_no + 1))
        })?;
        let fields = current.get_or_insert_with(BlockFields::default);
        let value = value.trim();

        match key.trim().to_lowercase().as_str() {
            "date" => fields.date = Some(DateKey::parse(value)?),
            "time" => fields.time = Some(TimeOfDay::parse(value)?),
            "emotions" => {
                fields.emotions = Some(
                    value
                        .split(',')
                        .map(|e| e.trim().to_string())
                        .filter(|e| !e.is_empty())
                        .collect(),
                )
            }
            "intensity" => {
                let intensity = value.parse::<u8>().map_err(|_| {
                    ValidationError::MalformedPayload(format!("line {}: intensity '{}' is not a number", line_no + 1, value))
                })?;
                fields.intensity = Some(intensity);
            }
            "trigger" => fields.trigger = value.to_string(),
            "coping" => fields.coping = value.to_string(),
            "improve" => fields.improve = value.to_string(),
            other => log::debug!("[JOURNAL] ignoring unknown key '{}' on line {}", other, line_no + 1),
        }
    }
    if let Some(fields) = current.take() {
        entries.push(finish_block(child_id, fields, entries.len() + 1)?);
    }

    Ok(entries)
}

fn finish_block(child_id: &str, fields: BlockFields, block: usize) -> Result<JournalEntry, ValidationError> {
    let entry = JournalEntry {
        id: 0,
        child_id: child_id.to_string(),
        occurred_on: fields.date.ok_or_else(|| missing("date", block))?,
        time_of_day: fields.time.ok_or_else(|| missing("time", block))?,
        emotions: fields.emotions.ok_or_else(|| missing("emotions", block))?,
        intensity: fields.intensity.ok_or_else(|| missing("intensity", block))?,
        trigger: fields.trigger,
        coping_description: fields.coping,
        improvement_note: fields.improve,
        // Blobs carry no creation time; identity falls back to the headline
        created_at_micros: None,
    };
    entry.validate()?;
    Ok(entry)
}
