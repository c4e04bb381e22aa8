//! Pixur CLI
//!
//! Operator tools for Pixur identifiers, tokens and media.
//!
//! # Commands
//!
//! - `varint` - Encode or decode public identifiers
//! - `path` - Show where a pic lives in the pix tree
//! - `token` - Mint or inspect web tokens
//! - `probe` - Run the media pipeline on a file
//! - `login` - Obtain or refresh tokens from a gateway
//! - `user` - Build a gateway users-file entry

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Pixur command-line tools.
#[derive(Parser)]
#[command(name = "pixur")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode or decode public identifiers
    Varint {
        #[command(subcommand)]
        action: VarintAction,
    },

    /// Show the file path and URL of a pic
    Path {
        /// Pic id, as a number or varint text
        id: String,

        /// File extension
        #[arg(short, long, default_value = "jpg")]
        ext: String,

        /// Root of the pix tree
        #[arg(short, long, default_value = "pix")]
        root: PathBuf,

        /// Show the thumbnail instead
        #[arg(short, long)]
        thumbnail: bool,
    },

    /// Mint or inspect web tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Probe a media file and optionally save its frame
    Probe {
        /// Media file
        file: PathBuf,

        /// Write the extracted frame here (format from the extension)
        #[arg(short, long)]
        frame: Option<PathBuf>,
    },

    /// Obtain tokens from a gateway, reusing or refreshing saved ones
    Login {
        /// Gateway base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        gateway: String,

        /// Login name; prompted for when omitted
        #[arg(short, long)]
        ident: Option<String>,

        /// Login secret; read from the terminal without echo when omitted
        #[arg(short, long)]
        secret: Option<String>,

        /// File holding the last token response
        #[arg(short, long, default_value = ".pixur-tokens.json")]
        token_file: PathBuf,
    },

    /// Print a users-file entry with a bcrypt hash of a secret read from the terminal
    User {
        /// Numeric user id
        #[arg(short, long)]
        user: i64,

        /// Login name
        #[arg(short, long)]
        ident: String,

        /// Capability names, e.g. PIC_READ
        #[arg(short, long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
}

#[derive(Subcommand)]
enum VarintAction {
    /// Number to varint text
    Encode {
        /// Signed 64-bit values
        #[arg(allow_negative_numbers = true)]
        values: Vec<i64>,
    },
    /// Varint text to number
    Decode {
        /// Varint texts
        texts: Vec<String>,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Sign a new token
    Mint {
        /// Signing secret
        #[arg(short, long)]
        secret: String,

        /// Treat the secret as hex
        #[arg(long)]
        hex: bool,

        /// Numeric user id
        #[arg(short, long)]
        user: i64,

        /// auth, refresh or pix
        #[arg(short = 't', long = "type", default_value = "auth")]
        token_type: String,

        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        ttl: u64,

        /// Soft lifetime in seconds
        #[arg(long)]
        soft_ttl: Option<u64>,

        /// Refresh family id
        #[arg(long, default_value = "0")]
        token_id: i64,

        /// Parent refresh family id
        #[arg(long, default_value = "0")]
        parent_id: i64,

        /// Issuer
        #[arg(long, default_value = "")]
        issuer: String,
    },
    /// Show a token's payload and lifecycle state
    Inspect {
        /// Token text
        token: String,

        /// Verify with this secret
        #[arg(short, long)]
        secret: Option<String>,

        /// Treat the secret as hex
        #[arg(long)]
        hex: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Varint { action } => match action {
            VarintAction::Encode { values } => commands::varint::encode(&values),
            VarintAction::Decode { texts } => commands::varint::decode(&texts)?,
        },
        Commands::Path {
            id,
            ext,
            root,
            thumbnail,
        } => commands::path::run(&id, &ext, &root, thumbnail)?,
        Commands::Token { action } => match action {
            TokenAction::Mint {
                secret,
                hex,
                user,
                token_type,
                ttl,
                soft_ttl,
                token_id,
                parent_id,
                issuer,
            } => {
                let key = commands::token::secret_bytes(&secret, hex)?;
                let opts = commands::token::MintOptions {
                    user_id: user,
                    token_type: commands::token::parse_type(&token_type)?,
                    ttl_secs: ttl,
                    soft_ttl_secs: soft_ttl,
                    token_id,
                    parent_id,
                    issuer,
                };
                commands::token::mint(&key, &opts)?;
            }
            TokenAction::Inspect { token, secret, hex } => {
                let key = secret
                    .map(|s| commands::token::secret_bytes(&s, hex))
                    .transpose()?;
                commands::token::inspect(&token, key.as_deref())?;
            }
        },
        Commands::Probe { file, frame } => commands::probe::run(&file, frame.as_deref()).await?,
        Commands::Login {
            gateway,
            ident,
            secret,
            token_file,
        } => {
            commands::login::run(&gateway, ident.as_deref(), secret.as_deref(), &token_file).await?
        }
        Commands::User {
            user,
            ident,
            capabilities,
        } => commands::user::run(user, &ident, &capabilities)?,
    }

    Ok(())
}
