use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use taskrs_client_core::models::{Order, RequestFilter};

#[derive(Parser, Debug)]
#[command(name = "taskrs")]
#[command(version, about = "Administration client for a taskrs server", long_about = None)]
pub struct Cli {
    /// Server base URL, overrides the config file
    #[arg(long, global = true, env = "TASKRS_BASE_URL")]
    pub base_url: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store the session
    Login {
        /// Defaults to the last used email
        #[arg(long)]
        email: Option<String>,
    },
    /// End the session on the server and forget it locally
    Logout,
    /// Show the stored session and its expiry
    Status,
    /// Exchange the refresh token for a new access token
    Refresh,
    /// Keep the session alive, renewing before each expiry, until Ctrl-C
    Watch,
    #[command(subcommand)]
    Users(UsersCommand),
    #[command(subcommand)]
    Categories(CategoriesCommand),
    #[command(subcommand)]
    Permissions(PermissionsCommand),
}

#[derive(Subcommand, Debug)]
pub enum UsersCommand {
    List(FilterArgs),
    /// The password is read from TASKRS_NEW_PASSWORD or prompted for
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        /// Create the account deactivated
        #[arg(long)]
        deactivated: bool,
    },
    Update {
        id: i32,
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        deactivated: bool,
    },
    Delete {
        id: i32,
    },
}

#[derive(Subcommand, Debug)]
pub enum CategoriesCommand {
    List(FilterArgs),
    /// Children of a category, or the root categories
    Sub {
        id: Option<i32>,
    },
    Create {
        name: String,
        #[arg(long)]
        parent: Option<i32>,
    },
    Update {
        id: i32,
        name: String,
        #[arg(long)]
        parent: Option<i32>,
    },
    Delete {
        id: i32,
        /// Also delete child categories
        #[arg(long)]
        cascade: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PermissionsCommand {
    List(FilterArgs),
    Grant(AssignmentArgs),
    Revoke(AssignmentArgs),
    /// Replace all permissions of a user
    Set(AssignmentArgs),
}

#[derive(Args, Debug)]
pub struct AssignmentArgs {
    pub user_id: i32,
    #[arg(required = true, value_delimiter = ',')]
    pub permission_ids: Vec<i32>,
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Free text search
    #[arg(long)]
    pub query: Option<String>,
    #[arg(long)]
    pub order_by: Option<String>,
    #[arg(long, value_enum)]
    pub order: Option<SortOrder>,
    #[arg(long)]
    pub page: Option<i32>,
    #[arg(long)]
    pub limit: Option<i32>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl FilterArgs {
    pub fn to_filter(&self) -> RequestFilter {
        RequestFilter {
            query: self.query.clone(),
            order_by: self.order_by.clone(),
            order: self.order.map(|order| match order {
                SortOrder::Asc => Order::Ascending,
                SortOrder::Desc => Order::Descending,
            }),
            page: self.page,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let cli = Cli::try_parse_from(["taskrs", "login", "--email", "a@b.c"]).unwrap();
        assert!(matches!(cli.command, Command::Login { email: Some(ref e) } if e == "a@b.c"));
    }

    #[test]
    fn test_parse_permission_ids() {
        let cli = Cli::try_parse_from(["taskrs", "permissions", "grant", "3", "1,2,5"]).unwrap();
        match cli.command {
            Command::Permissions(PermissionsCommand::Grant(args)) => {
                assert_eq!(args.user_id, 3);
                assert_eq!(args.permission_ids, vec![1, 2, 5]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_permission_ids_required() {
        assert!(Cli::try_parse_from(["taskrs", "permissions", "set", "3"]).is_err());
    }

    #[test]
    fn test_filter_args() {
        let cli = Cli::try_parse_from([
            "taskrs", "users", "list", "--query", "ada", "--order", "desc", "--page", "1",
        ])
        .unwrap();
        let Command::Users(UsersCommand::List(args)) = cli.command else {
            panic!("expected users list");
        };
        let filter = args.to_filter();
        assert_eq!(filter.query.as_deref(), Some("ada"));
        assert_eq!(filter.order, Some(Order::Descending));
        assert_eq!(filter.page, Some(1));
        assert_eq!(filter.limit, None);
    }

    #[test]
    fn test_global_base_url() {
        let cli = Cli::try_parse_from(["taskrs", "status", "--base-url", "http://x/api/"]).unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("http://x/api/"));
    }
}
