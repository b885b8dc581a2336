//! Command-line arguments for the `aqc` host.

use std::path::PathBuf;

pub const USAGE: &str = "Usage: aqc [--config <config.toml>] <FILE>...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Run(CliArgs),
    Help,
}

pub fn parse_args<I>(args: I) -> anyhow::Result<Parsed>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut files = Vec::new();

    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = it
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing value for {arg}"))?;
                config = Some(PathBuf::from(value));
            }
            "--help" | "-h" => return Ok(Parsed::Help),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                anyhow::bail!("unknown argument: {flag}")
            }
            _ => files.push(PathBuf::from(arg)),
        }
    }

    if files.is_empty() {
        anyhow::bail!("no input files\n{USAGE}");
    }
    Ok(Parsed::Run(CliArgs { config, files }))
}
