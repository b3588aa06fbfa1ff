//! Leader device selection

use std::io::{self, BufRead, Write};

use droidwalk_core::prelude::*;

/// Resolve a choice, either a list index or a serial, against `serials`
pub fn resolve_leader_choice(choice: &str, serials: &[String]) -> Result<usize> {
    let choice = choice.trim();
    if let Some(i) = serials.iter().position(|s| s == choice) {
        return Ok(i);
    }
    match choice.parse::<usize>() {
        Ok(i) if i < serials.len() => Ok(i),
        _ => Err(Error::InvalidLeader {
            choice: choice.to_string(),
        }),
    }
}

/// Ask on the terminal which device leads
pub async fn prompt_leader(serials: &[String]) -> Result<usize> {
    let listing: Vec<String> = serials
        .iter()
        .enumerate()
        .map(|(i, s)| format!("  [{}] {}", i, s))
        .collect();

    let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "Select the leader device:")?;
        for line in &listing {
            writeln!(stdout, "{}", line)?;
        }
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer)
    })
    .await
    .map_err(|_| Error::ChannelClosed)??;

    resolve_leader_choice(&answer, serials)
}

/// The leader's index: the only device, the configured one, or the user's pick
pub async fn select_leader(configured: Option<&str>, serials: &[String]) -> Result<usize> {
    if serials.is_empty() {
        return Err(Error::NoDevices);
    }
    if serials.len() == 1 {
        return Ok(0);
    }
    let index = match configured {
        Some(choice) => resolve_leader_choice(choice, serials)?,
        None => prompt_leader(serials).await?,
    };
    info!("Leader device: {}", serials[index]);
    Ok(index)
}
