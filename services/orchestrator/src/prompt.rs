//! Interactive confirmation.

use std::io::{self, BufRead, Write};

/// Asks the operator to confirm a destructive step.
pub trait Prompt: Send + Sync {
    fn confirm(&self, message: &str) -> io::Result<bool>;
}

/// Reads `y`/`yes` from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&self, message: &str) -> io::Result<bool> {
        let mut stdout = io::stdout();
        write!(stdout, "{} [y/N]: ", message)?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_yes(&answer))
    }
}

/// Always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub bool);

impl Prompt for FixedPrompt {
    fn confirm(&self, _message: &str) -> io::Result<bool> {
        Ok(self.0)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        for answer in ["y\n", "YES", " yes \n"] {
            assert!(is_yes(answer), "{:?}", answer);
        }
        for answer in ["", "\n", "n", "yep", "no"] {
            assert!(!is_yes(answer), "{:?}", answer);
        }
    }
}
