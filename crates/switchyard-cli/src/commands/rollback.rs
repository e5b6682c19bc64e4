use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;

use tracing::warn;

use switchyard_rollout::{ReleaseError, RollbackTarget};

use super::{OutputFormat, build_controller, load_config, print_plan, report_run};

pub async fn run(
    config_path: &Path,
    format: OutputFormat,
    target: RollbackTarget,
    force: bool,
    dry_run: bool,
) -> anyhow::Result<u8> {
    let config = load_config(config_path)?;
    let controller = build_controller(&config)?;
    let plan = controller.plan_rollback(&target).await?;

    if dry_run {
        print_plan(&plan, format)?;
        return Ok(0);
    }

    if !force {
        eprint!("{}", plan.render_text());
        let question = format!(
            "Roll back to {} on slot {}?",
            plan.version, plan.target_slot
        );
        let stdin = std::io::stdin();
        let interactive = stdin.is_terminal();
        confirm(&question, interactive, &mut stdin.lock())?;
    }

    // Pin the resolved version so the run matches what was confirmed.
    let run = controller
        .rollback(&RollbackTarget::Version(plan.version))
        .await?;
    report_run(&run, format)
}

/// Ask on stderr and read the answer from `input`.
///
/// Anything but yes, or no terminal to ask on, is [`ReleaseError::Aborted`].
fn confirm(question: &str, interactive: bool, input: &mut impl BufRead) -> anyhow::Result<()> {
    if !interactive {
        warn!("stdin is not a terminal; pass --force to roll back non-interactively");
        return Err(ReleaseError::Aborted.into());
    }
    eprint!("{question} [y/N] ");
    std::io::stderr().flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    if is_yes(&answer) {
        Ok(())
    } else {
        Err(ReleaseError::Aborted.into())
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::exit_code;

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }

    #[test]
    fn non_interactive_rollback_is_aborted() {
        let mut input = "y\n".as_bytes();
        let err = confirm("Roll back?", false, &mut input).unwrap_err();
        assert!(matches!(err.downcast_ref::<ReleaseError>(), Some(ReleaseError::Aborted)));
        assert_eq!(exit_code(&err), 5);
    }

    #[test]
    fn answer_decides_interactive_rollback() {
        confirm("Roll back?", true, &mut "yes\n".as_bytes()).unwrap();

        let err = confirm("Roll back?", true, &mut "n\n".as_bytes()).unwrap_err();
        assert_eq!(exit_code(&err), 5);
        let err = confirm("Roll back?", true, &mut "".as_bytes()).unwrap_err();
        assert_eq!(exit_code(&err), 5);
    }
}
