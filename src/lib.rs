pub mod error;
pub mod interpreter;
pub mod primitives;
pub mod brainfuck;
pub mod befunge;
pub mod abcr;
pub mod past;
pub mod monkeys;
pub mod config;
pub mod registry;
