use clap::Args;
use lampctl::{LampConfig, NetworkInfo, OutputFormat};
use serde_json::json;

use super::{fail, print_json};

/// Arguments for the Ip command
#[derive(Args)]
pub struct IpArgs {
    /// Print the public IP address only
    #[clap(long)]
    pub simple: bool,

    /// Skip the public IP lookup
    #[clap(long, conflicts_with = "simple")]
    pub local: bool,
}

pub fn run(config: &LampConfig, args: IpArgs, output_format: OutputFormat) {
    let IpArgs { simple, local } = args;
    let network = NetworkInfo::from_config(config);

    if simple {
        println!("{}", network.public_address());
        return;
    }

    if local {
        match network.local_address() {
            Ok(ip) if output_format.is_json() => {
                print_json(&json!({"local_address": ip}), output_format)
            }
            Ok(ip) => println!("Local IP:   {}", ip),
            Err(e) => fail(e, output_format),
        }
        return;
    }

    match network.snapshot() {
        Ok(snapshot) if output_format.is_json() => print_json(&snapshot, output_format),
        Ok(snapshot) => println!("{}", snapshot.format_text()),
        Err(e) => fail(e, output_format),
    }
}
