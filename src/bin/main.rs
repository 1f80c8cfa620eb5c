use std::error::Error;

use clap::Parser;
use family_api_client::client::ApiClient;
use family_api_client::coordinator::RefreshError;
use family_api_client::credentials::{
    CredentialLifetimes, CredentialPair, CredentialStore, FileCredentialStore,
};
use family_api_client::descriptor::RequestDescriptor;
use family_api_client::endpoints::ApiEndpoints;
use family_api_client::parameters::{
    Commands, CredentialStatus, GlobalArgs, OutputFormat, build_http_config, parse_json_body,
    select_credentials_path, select_method,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "family-api-cli")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.global.log_level)?)
        .with_writer(std::io::stderr)
        .init();

    let credentials_path = select_credentials_path(cli.global.credentials_file.clone());
    debug!(path = %credentials_path.display(), "using credentials file");
    let store = FileCredentialStore::new(credentials_path, CredentialLifetimes::default());

    match cli.command {
        Commands::SignIn {
            access_token,
            refresh_token,
        } => {
            store.set(CredentialPair::new(access_token, refresh_token));
            println!("Signed in");
            Ok(())
        }
        Commands::SignOut => {
            store.clear();
            println!("Signed out");
            Ok(())
        }
        Commands::Status { output_format } => {
            let status = CredentialStatus::from(&store.load());
            match output_format {
                OutputFormat::Plain => {
                    println!("access token: {}", presence(status.access_token));
                    println!("refresh token: {}", presence(status.refresh_token));
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            }
            Ok(())
        }
        Commands::Request {
            method,
            path,
            body,
            output_format,
        } => {
            let http_config = build_http_config(&cli.global)?;
            let endpoints = ApiEndpoints::try_from(cli.global.base_url.as_str())?;
            let client = ApiClient::from_config(
                http_config,
                endpoints,
                store,
                |reason: &RefreshError| {
                    eprintln!(
                        "Session expired ({reason}). Sign in again with `family-api-cli sign-in`."
                    );
                },
            )?;

            let mut descriptor =
                RequestDescriptor::new(select_method(&method)?, client.endpoints().resolve(&path)?);
            if let Some(body) = body {
                descriptor = descriptor.with_json(&parse_json_body(&body)?)?;
            }

            let response = client.send(descriptor)?;
            print_body(response.body(), &output_format)
        }
    }
}

fn presence(present: bool) -> &'static str {
    if present { "present" } else { "missing" }
}

fn print_body(body: &[u8], output_format: &OutputFormat) -> Result<(), Box<dyn Error>> {
    match output_format {
        OutputFormat::Plain => println!("{}", String::from_utf8_lossy(body)),
        OutputFormat::Json => {
            let value: serde_json::Value = serde_json::from_slice(body)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}
