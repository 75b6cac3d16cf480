//! Consistency checking and repair.

pub mod ops;
pub mod rules;
pub mod set;
pub mod unique;

use std::io::Write;

/// Seam for interactive confirmation. The checker and the duplicate
/// resolver only ever need single-character answers.
pub trait Prompter {
    /// Ask a question answered by one of `choices` (case matters:
    /// uppercase answers mean "apply to all remaining"). An empty answer
    /// picks `default`; end of input behaves like `q` where offered,
    /// else like the default.
    fn ask_choice(&mut self, question: &str, choices: &str, default: char) -> char;

    fn ask_yes_no(&mut self, question: &str, default: bool) -> bool {
        let def = if default { 'y' } else { 'n' };
        self.ask_choice(question, "yn", def) == 'y'
    }
}

/// Reads answers from standard input.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask_choice(&mut self, question: &str, choices: &str, default: char) -> char {
        loop {
            print!("{question} ");
            let _ = std::io::stdout().flush();

            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    return if choices.contains('q') { 'q' } else { default };
                }
                Ok(_) => {}
            }

            match line.trim().chars().next() {
                None => return default,
                Some(c) if choices.contains(c) => return c,
                Some(_) => continue,
            }
        }
    }
}

/// Per-run repair state: report vs repair, the sticky "apply to all
/// remaining" answer, and the user's request to stop.
pub struct RepairState<'a> {
    repair: bool,
    auto_choice: Option<char>,
    quit: bool,
    prompter: &'a mut dyn Prompter,
}

impl<'a> RepairState<'a> {
    /// Outside interactive mode every repair question is auto-answered
    /// with yes.
    pub fn new(repair: bool, interactive: bool, prompter: &'a mut dyn Prompter) -> Self {
        Self {
            repair,
            auto_choice: (!interactive).then_some('y'),
            quit: false,
            prompter,
        }
    }

    /// True when repairs apply without asking.
    pub fn repairing_all(&self) -> bool {
        self.repair && self.auto_choice == Some('y')
    }

    /// Decide the pending repair. Prompts the user unless an answer
    /// already applies to all remaining occurrences.
    pub fn should_repair(&mut self) -> bool {
        if !self.repair {
            return false;
        }

        let mut choice = match self.auto_choice {
            Some(c) => c,
            None => self.prompter.ask_choice(" Repair [ynq]?", "ynYNq", 'y'),
        };

        if choice.is_ascii_uppercase() {
            choice = choice.to_ascii_lowercase();
            self.auto_choice = Some(choice);
        }

        self.quit = choice == 'q';
        choice == 'y'
    }

    pub fn quit(&self) -> bool {
        self.quit
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Prompter;

    /// Feeds a fixed sequence of answers; falls back to the default.
    pub struct Scripted(pub Vec<char>);

    impl Prompter for Scripted {
        fn ask_choice(&mut self, _question: &str, _choices: &str, default: char) -> char {
            if self.0.is_empty() {
                default
            } else {
                self.0.remove(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Scripted;
    use super::*;

    #[test]
    fn test_noninteractive_repairs_all() {
        let mut p = Scripted(vec![]);
        let mut state = RepairState::new(true, false, &mut p);
        assert!(state.repairing_all());
        assert!(state.should_repair());
        assert!(!state.quit());
    }

    #[test]
    fn test_report_mode_never_repairs() {
        let mut p = Scripted(vec![]);
        let mut state = RepairState::new(false, false, &mut p);
        assert!(!state.should_repair());
        assert!(!state.repairing_all());
    }

    #[test]
    fn test_uppercase_answer_sticks() {
        let mut p = Scripted(vec!['N', 'y']);
        let mut state = RepairState::new(true, true, &mut p);
        assert!(!state.should_repair());
        // The 'y' script entry is never consulted: 'N' stuck.
        assert!(!state.should_repair());
    }

    #[test]
    fn test_quit_answer() {
        let mut p = Scripted(vec!['q']);
        let mut state = RepairState::new(true, true, &mut p);
        assert!(!state.should_repair());
        assert!(state.quit());
    }
}
