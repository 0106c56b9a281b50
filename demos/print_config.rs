use azure_keyvault_auth::config;

pub fn main() {
    let profile = std::env::args().nth(1);

    // Config file, then the profile's table, then AZURE_* environment variables
    let config = config::load_config(profile.as_deref()).unwrap();
    println!("{:#?}", config);

    println!(
        "verify challenge resource: {}",
        config.verify_challenge_resource()
    );
    println!("token refresh margin: {:?}", config.token_refresh_margin());
}
