use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "wsfs",
    version,
    about = "Remote filesystem over an SFTP-style protocol on WebSockets"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a directory to WebSocket clients
    Serve(ServeArgs),
    /// List a remote directory
    Ls(LsArgs),
    /// Print a remote file as UTF-8 text
    Cat(PathArgs),
    /// Show attributes of a remote path
    Stat(PathArgs),
    /// Upload a local file
    Put(PutArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Directory to serve; clients see it as `/`
    #[arg(long, default_value = ".")]
    pub root: String,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:4000")]
    pub listen: String,

    /// Reject every modifying operation
    #[arg(long)]
    pub read_only: bool,

    /// Do not reveal file owner ids
    #[arg(long)]
    pub hide_uid_gid: bool,

    /// Byte budget for one directory listing batch
    #[arg(long)]
    pub readdir_budget: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Server URL
    #[arg(long, default_value = "ws://127.0.0.1:4000/")]
    pub url: String,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Remote directory
    #[arg(default_value = "/")]
    pub path: String,

    /// Show `ls -l` style lines
    #[arg(long, short)]
    pub long: bool,
}

#[derive(Args, Debug)]
pub struct PathArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Remote path
    pub path: String,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Local file to upload
    pub local: String,

    /// Remote destination path
    pub remote: String,
}

