//! Access methods: B-tree recovery/search and the queue extent layer.

pub mod btree;
pub mod queue;
