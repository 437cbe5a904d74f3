use paygate::{ClientConfig, GatewayClient, Language, TokenScope};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paygate=debug")),
        )
        .init();

    let env = |name: &str| std::env::var(name).unwrap_or_default();
    let config = ClientConfig::builder()
        .account_id(env("PAYGATE_ACCOUNT_ID").parse().unwrap_or_default())
        .client_id(&env("PAYGATE_CLIENT_ID"))
        .client_secret(&env("PAYGATE_CLIENT_SECRET"))
        .gateway_url("https://gw.sandbox.example.com")
        .scope(TokenScope::PaymentAll)
        .language(Language::English)
        .auto_refresh(true)
        .metrics(true)
        .build();

    // Fails early if a mandatory parameter is missing. No request is made yet.
    let client = GatewayClient::new(config).unwrap();

    // The first request exchanges the client credentials for a token, later ones reuse it.
    let payment_id = env("PAYGATE_PAYMENT_ID").parse().unwrap_or_default();
    match client.get_payment(payment_id).await {
        Ok(payment) => println!(
            "Payment {} is {} ({} {})",
            payment.id, payment.state, payment.amount, payment.currency
        ),
        Err(e) => eprintln!("Failed to fetch payment: {e}"),
    }

    match client.authenticator().status().await {
        Ok(credential) => println!("Token valid until {}", credential.expires_at()),
        Err(e) => eprintln!("No token available: {e}"),
    }

    // Stops the background refresh.
    client.close();
}
