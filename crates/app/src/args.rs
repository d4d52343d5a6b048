pub use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "dockhand")]
#[command(about = "Supervisor for a remote-controlled sync/mount engine")]
pub struct Args {
    #[command(subcommand)]
    pub command: crate::Command,
}
