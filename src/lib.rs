// LocalAgent Gate - Library Root
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// All modules exported here for use by the binary and tests.

pub mod config;
pub mod error;
pub mod paths;

// ============================================================================
// GUARDS - sandbox, domain policy, command policy, duplicate requests
// ============================================================================

pub mod domains;
pub mod guard;
pub mod validate;

// ============================================================================
// PRIMITIVES - process execution and page fetch
// ============================================================================

pub mod exec;
pub mod web;

// ============================================================================
// TOOLS + DISPATCH
// ============================================================================

/// The six sandboxed operations
pub mod tools;

/// Prompt text -> tool calls
pub mod dispatch;

// ============================================================================
// CHAT SURFACE
// ============================================================================

pub mod chat;
pub mod llm;
pub mod metrics;
pub mod server;
