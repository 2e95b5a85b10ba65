//! Test Helper Utilities
//!
//! Shared utilities for testing finsys-fraud

#![allow(dead_code)]

pub mod classifier_server;
pub mod classifiers;
pub mod db_utils;
pub mod fault_injection;

pub use classifier_server::{spawn_classifier_server, ServerBehavior};
pub use classifiers::{FailingClassifier, FixedClassifier, FlakyClassifier, HangingClassifier};
pub use db_utils::{balanced_draft, draft, test_stores, wait_for, TestStores};
pub use fault_injection::{DocFault, FaultyDocumentStore};
