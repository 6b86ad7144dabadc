use anyhow::{Result, bail};
use nova_chat::ResolvedModality;
use std::io::Write;
use tokio::io::{AsyncBufRead, Lines};

/// Outcome of the modality prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerResult {
    /// Chosen modality key.
    Selected(String),
    Quit,
}

/// How one typed line maps onto the offered modalities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Index(usize),
    Quit,
    Invalid,
}

/// Accepts a 1-based number or a modality key (any case).
pub fn parse_choice(input: &str, modalities: &[ResolvedModality]) -> Choice {
    let input = input.trim();
    if input.eq_ignore_ascii_case("q") || input.eq_ignore_ascii_case("/quit") {
        return Choice::Quit;
    }
    if let Ok(n) = input.parse::<usize>() {
        return if (1..=modalities.len()).contains(&n) {
            Choice::Index(n - 1)
        } else {
            Choice::Invalid
        };
    }
    modalities
        .iter()
        .position(|m| m.key.eq_ignore_ascii_case(input))
        .map(Choice::Index)
        .unwrap_or(Choice::Invalid)
}

/// Ask for a modality. A single modality is taken without asking.
pub async fn pick_modality<R>(
    lines: &mut Lines<R>,
    modalities: &[ResolvedModality],
) -> Result<PickerResult>
where
    R: AsyncBufRead + Unpin,
{
    match modalities {
        [] => bail!("Company offers no modalities"),
        [only] => return Ok(PickerResult::Selected(only.key.clone())),
        _ => {}
    }

    println!("Choose a topic:");
    for (i, modality) in modalities.iter().enumerate() {
        match &modality.description {
            Some(desc) => println!("  {}) {} - {}", i + 1, modality.display_label, desc),
            None => println!("  {}) {}", i + 1, modality.display_label),
        }
    }

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(PickerResult::Quit);
        };
        match parse_choice(&line, modalities) {
            Choice::Index(i) => return Ok(PickerResult::Selected(modalities[i].key.clone())),
            Choice::Quit => return Ok(PickerResult::Quit),
            Choice::Invalid => println!("Pick 1-{} or q to quit", modalities.len()),
        }
    }
}
