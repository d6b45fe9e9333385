//! Script assembly.

/// One generated phase fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutput {
    /// Position in the script.
    pub number: u8,
    /// Section title.
    pub title: &'static str,
    /// SQL text, possibly empty.
    pub sql: String,
}

/// Folds phase fragments into one script under a header.
#[derive(Debug, Clone)]
pub struct ScriptAssembler {
    header: String,
    phase_comments: bool,
}

impl ScriptAssembler {
    /// Creates an assembler that opens every script with `header`.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            phase_comments: true,
        }
    }

    /// Enables or disables `-- Phase N: title` section comments.
    #[must_use]
    pub const fn with_phase_comments(mut self, enabled: bool) -> Self {
        self.phase_comments = enabled;
        self
    }

    /// Builds the script: fragments sorted by phase number, empty ones
    /// skipped, trailing whitespace trimmed from each fragment.
    ///
    /// Lines inside a fragment are kept as they are, so procedure bodies
    /// carried in string literals survive byte for byte.
    #[must_use]
    pub fn assemble(&self, mut phases: Vec<PhaseOutput>) -> String {
        phases.sort_by_key(|p| p.number);
        let mut sections = vec![self.header.trim_end().to_string()];
        for phase in phases {
            let sql = phase.sql.trim_end();
            if sql.trim().is_empty() {
                continue;
            }
            if self.phase_comments {
                sections.push(format!("-- Phase {}: {}\n{}", phase.number, phase.title, sql));
            } else {
                sections.push(sql.to_string());
            }
        }
        sections.join("\n\n")
    }
}
