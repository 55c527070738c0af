mod common;

mod cycle_detection;
mod failure;
mod graph_basic;
mod link_sync;
