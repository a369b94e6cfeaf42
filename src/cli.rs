use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vpndesk", about = "Desktop VPN client", version = env!("VPNDESK_BUILD_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: TopCommand,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum TopCommand {
    /// Sign in with account credentials
    Login {
        /// Account email address
        email: String,
    },

    /// Disconnect, remove VPN credentials and sign out
    Logout,

    /// Display account information
    Info,

    /// List servers with latency, filtered and paginated
    Servers {
        /// Case-insensitive substring of the server name
        #[arg(short, long)]
        search: Option<String>,

        /// Exact location (e.g., "Paris, FR")
        #[arg(short, long)]
        location: Option<String>,

        /// Country code (e.g., FR, JP)
        #[arg(short, long)]
        country: Option<String>,

        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },

    /// Connect to a server; connecting to the current server disconnects
    Connect {
        /// Server id or name
        server: String,
    },

    /// Disconnect the active tunnel
    Disconnect,

    /// Show the tunnel state
    Status,

    /// Internal: privileged tunnel and credential service (hidden)
    #[command(hide = true)]
    Backend {
        /// Listen on the configured socket
        #[arg(long)]
        serve: bool,

        /// Group allowed to use the socket (overrides config)
        #[arg(long)]
        authorized_group: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servers_defaults_to_first_page() {
        let cli = Cli::try_parse_from(["vpndesk", "servers", "--country", "fr"]).unwrap();
        match cli.command {
            TopCommand::Servers {
                country,
                page,
                search,
                ..
            } => {
                assert_eq!(country.as_deref(), Some("fr"));
                assert_eq!(page, 1);
                assert!(search.is_none());
            }
            _ => panic!("expected servers command"),
        }
    }

    #[test]
    fn test_backend_is_parsed_with_global_verbose() {
        let cli = Cli::try_parse_from(["vpndesk", "backend", "--serve", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            TopCommand::Backend { serve: true, .. }
        ));
    }
}
