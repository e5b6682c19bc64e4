use std::fmt::Write as _;
use std::path::Path;

use switchyard_rollout::ReleaseError;
use switchyard_state::{ReleaseEvent, SlotRegistry};

use super::{OutputFormat, load_config, open_registry, print_json};

pub fn run(config_path: &Path, format: OutputFormat, limit: usize) -> anyhow::Result<u8> {
    let config = load_config(config_path)?;
    let registry = open_registry(&config)?;
    let events = registry.history(limit).map_err(ReleaseError::from)?;

    match format {
        OutputFormat::Json => print_json(&events)?,
        OutputFormat::Text if events.is_empty() => println!("no releases recorded"),
        OutputFormat::Text => print!("{}", render_text(&events)),
    }
    Ok(0)
}

fn render_text(events: &[ReleaseEvent]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>5}  {:<10}  {:<5}  {:<20}  {}",
        "SEQ", "AT", "SLOT", "VERSION", "OUTCOME"
    );
    for event in events {
        let _ = write!(
            out,
            "{:>5}  {:<10}  {:<5}  {:<20}  {}",
            event.seq,
            event.at,
            event.slot.as_str(),
            event.version.as_str(),
            event.outcome.label()
        );
        if let Some(detail) = &event.detail {
            let _ = write!(out, ": {detail}");
        }
        out.push('\n');
    }
    out
}
