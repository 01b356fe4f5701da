//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "reelup")]
#[command(about = "Resumable video uploads to a Graph page", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', global = true, env = "REELUP_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a video file
    Upload(UploadArgs),

    /// Register a user, optionally with a referral code
    Register {
        user: String,

        /// Referral code of the inviting user
        #[arg(long, short = 'r')]
        referral: Option<String>,
    },

    /// Show a user's referral code and count
    Referral { user: String },

    /// Redeem a premium key for a user
    Redeem { user: String, key: String },

    /// Grant premium to a user (admin only)
    GrantPremium {
        /// Acting admin id
        #[arg(long = "as", value_name = "ADMIN")]
        actor: String,

        user: String,
    },

    /// Mint a single-use premium key (admin only)
    GenerateKey {
        /// Acting admin id
        #[arg(long = "as", value_name = "ADMIN")]
        actor: String,
    },
}

#[derive(Args)]
pub struct UploadArgs {
    /// Video file to upload
    pub file: PathBuf,

    /// Description attached on finish
    #[arg(long)]
    pub caption: Option<String>,

    /// Account to check quota against and credit the upload to
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Delete the file once the upload is confirmed
    #[arg(long)]
    pub delete_after: bool,
}
