use crate::befunge::BefungeConfig;
use crate::brainfuck::BrainfuckConfig;
use crate::monkeys::MonkeysConfig;
use crate::past::PastConfig;

/// Settings for every machine, handed to the registry factories.
///
/// ABCR has nothing to configure.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Config {
    pub brainfuck: BrainfuckConfig,
    pub befunge: BefungeConfig,
    pub past: PastConfig,
    pub monkeys: MonkeysConfig,
}

impl Config {
    /// Seed every machine that draws random numbers.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.befunge.seed = Some(seed);
        self.past.seed = Some(seed);
        self.monkeys.seed = Some(seed);
        self
    }
}
