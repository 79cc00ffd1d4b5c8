use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "genrelay")]
#[command(about = "Client log relay and rate-limited generation gateway", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server (log ingestion, recent logs, generation)
    Serve(ServeArgs),
    /// Generate one piece of text or one image
    Generate(GenerateArgs),
    /// Run every prompt of a JSON-lines file and store the results
    Batch(BatchArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (defaults to server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    pub prompt: String,

    /// Generate an image instead of text
    #[arg(long)]
    pub image: bool,

    /// Model override
    #[arg(long)]
    pub model: Option<String>,

    /// Write the payload to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    /// JSON-lines file, one `{key, prompt, kind?, model?}` per line
    pub file: PathBuf,

    /// Regenerate keys that already have a stored payload
    #[arg(long)]
    pub overwrite: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate() {
        let cli = Cli::parse_from([
            "genrelay", "generate", "a red fox", "--image", "--out", "fox.png",
        ]);
        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.prompt, "a red fox");
                assert!(args.image);
                assert_eq!(args.out, Some(PathBuf::from("fox.png")));
                assert_eq!(args.model, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_serve_and_batch() {
        let cli = Cli::parse_from(["genrelay", "serve", "--address", "127.0.0.1:9000"]);
        assert!(matches!(
            cli.command,
            Commands::Serve(ServeArgs { address: Some(a) }) if a.port() == 9000
        ));

        let cli = Cli::parse_from(["genrelay", "batch", "prompts.jsonl"]);
        assert!(matches!(cli.command, Commands::Batch(BatchArgs { overwrite: false, .. })));

        let cli = Cli::parse_from(["genrelay", "batch", "prompts.jsonl", "--overwrite"]);
        assert!(matches!(cli.command, Commands::Batch(BatchArgs { overwrite: true, .. })));
    }
}
