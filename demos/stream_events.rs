use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use oanda_sdk::config::{Credentials, Environment};
use oanda_sdk::rest::RestClient;
use oanda_sdk::stream::proto::AccountEventMessage;
use oanda_sdk::stream::session::EventsSession;
use secrecy::SecretString;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let access_token = "REPLACE_WITH_ACCESS_TOKEN".to_string();
    let default_account: u64 = 0;

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

        let mut session = EventsSession::for_accounts(rest, [account_id]);
        let received = Arc::new(Notify::new());
        let notify = Arc::clone(&received);
        session.subscribe(move |event: &AccountEventMessage| {
            if let Some(transaction) = &event.transaction {
                println!(
                    "account={} transaction={} type={} time={}",
                    transaction.account_id, transaction.id, transaction.kind, transaction.time
                );
            }
            notify.notify_one();
        });
        session.start().await?;

        // Place or close a trade on the account to produce an event.
        let got_event = tokio::time::timeout(Duration::from_secs(10), received.notified())
            .await
            .is_ok();
        let termination = session.stop_and_join().await;
        println!("event received: {got_event}, session ended: {termination:?}");
        Ok::<(), Box<dyn Error>>(())
    })
}
