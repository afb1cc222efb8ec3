use pfoertner::{settings::read_config, trace};

async fn start_up() -> color_eyre::Result<()> {
    // We don't care if we can't read the dotenv
    let _ = dotenv::dotenv();

    trace::setup()?;

    let config = read_config()?;

    let (_, app) = pfoertner::create_app(config).await?;
    app.await?;

    Ok(())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    start_up().await
}
