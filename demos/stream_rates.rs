use std::error::Error;
use std::time::Duration;

use oanda_sdk::config::{Credentials, Environment};
use oanda_sdk::rest::RestClient;
use oanda_sdk::stream::session::RatesSession;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let access_token = "REPLACE_WITH_ACCESS_TOKEN".to_string();
    let default_account: u64 = 0;
    let instruments = ["EUR_USD", "USD_JPY", "GBP_USD"];

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let credentials = Credentials::new(Environment::Practice, SecretString::new(access_token))
            .with_default_account(default_account);
        let account_id = credentials
            .default_account_id
            .ok_or("no default account configured")?;
        let rest = RestClient::new(credentials)?;

        let mut session = RatesSession::for_instruments(rest, account_id, instruments);
        let mut ticks = session.subscribe_channel();
        session.start().await?;

        match tokio::time::timeout(Duration::from_secs(10), ticks.recv()).await {
            Ok(Some(message)) => {
                if let Some(tick) = message.tick {
                    println!(
                        "{} bid={} ask={} spread={:.5} time={}",
                        tick.instrument,
                        tick.bid,
                        tick.ask,
                        tick.spread(),
                        tick.time
                    );
                }
            }
            Ok(None) => println!("rates stream closed before a tick arrived"),
            Err(_) => println!("no tick within 10s"),
        }

        let termination = session.stop_and_join().await;
        println!("rates session ended: {termination:?}");
        Ok::<(), Box<dyn Error>>(())
    })
}
