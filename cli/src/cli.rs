use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "aegish",
    version,
    about = "Security-monitored interactive shell"
)]
pub struct Cli {
    /// Model the validator should use (overrides configuration).
    #[arg(long, short = 'm')]
    pub model: Option<String>,
}
