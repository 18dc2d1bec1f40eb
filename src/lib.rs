//! secure-run - Fetch, seal and reconcile deployment secrets, then run a
//! command with them.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── cli/              # Command-line interface
//! │   ├── run           # Wrap a command with the assembled environment
//! │   ├── upload        # Push .env.bws.<scope> files into the vault
//! │   ├── scan          # Regenerate the required variables report
//! │   └── output        # Terminal rendering
//! └── core/             # Core library components
//!     ├── snapshot      # Immutable environment snapshot
//!     ├── config        # bwsconfig.json and the remote overlay
//!     ├── detect        # Netlify / Vercel detection
//!     ├── resolver      # Project and environment selection
//!     ├── envblock      # Selection block inside .env
//!     ├── scanner/      # Required variable discovery
//!     ├── vault/        # Vault client
//!     ├── cipher/       # AES-256-GCM with an ephemeral key
//!     ├── store/        # Encrypted bundles and their cleanup
//!     ├── retry         # Shared retry policy
//!     ├── plan          # Desired state and reconciliation plans
//!     ├── platform/     # Netlify and Vercel reconcilers
//!     ├── orchestrator  # The run pipeline
//!     └── upload        # Vault uploads
//! ```
//!
//! # Pipeline
//!
//! scan → validate token → resolve selection → fetch and seal secrets →
//! reconcile the deploy target (platform builds only) → run the command →
//! remove the bundles.

pub mod cli;
pub mod core;
pub mod error;
