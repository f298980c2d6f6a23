use clap::Parser;

use tempo_operator::cli::OperatorOpt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = OperatorOpt::parse();
    if let Err(err) = opt.process().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}
