use netstats::app::App;
use netstats::config::Config;
use netstats::logging::init_tracing;

#[tokio::main]
async fn main() -> netstats::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let app = App::new(config)?;
    app.start();
    app.serve().await
}
