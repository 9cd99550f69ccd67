//! TChain - a proof-of-work blockchain node with work-weighted fork choice
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, the block index, genesis and the consensus engine
//! - [`transaction`] - Signed opaque transactions and their validation
//! - [`mempool`] - Pending transactions
//!
//! ## Consensus
//! - [`pow`] - Difficulty targets, nonce search and work accounting
//! - [`merkle`] - Merkle roots over transactions
//!
//! ## Cryptography
//! - [`crypto`] - Hashing and signatures (secp256k1)
//!
//! ## State Management
//! - [`persistence`] - Block store (SQLite and in-memory)
//!
//! ## Networking
//! - [`network`] - Wire protocol, outbound sender and RPC server
//! - [`peers`] - Peer pool with discovery and liveness
//! - [`receiver`] - Inbound request handlers
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`node`] - Node composition and lifecycle
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus
// ============================================================================
pub mod merkle;
pub mod pow;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod peers;
pub mod receiver;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod node;
