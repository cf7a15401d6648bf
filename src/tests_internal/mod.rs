#![cfg(test)]

pub mod fatal_e2e;
pub mod load_e2e;
pub mod quiescence_e2e;
pub mod replay_e2e;
pub mod split_e2e;
