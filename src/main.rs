#![cfg(not(tarpaulin_include))]

use sheet_inventory::{app, config::Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // An incomplete configuration is served as the blocking error screen until a retry loads it
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            let setup = app::SetupState::new(e, Config::from_env);
            app::serve_setup(&Config::bind_addr_from_env(), setup).await?
        }
    };

    // Start the web application
    app::run(config).await?;

    Ok(())
}
