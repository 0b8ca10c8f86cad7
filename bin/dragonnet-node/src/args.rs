use argh::FromArgs;

#[derive(FromArgs)]
/// Dragon Net node: runs the webserver plus the level-appropriate
/// processors against env-driven configuration.
pub struct Args {
    /// override the webserver port
    #[argh(option, short = 'p')]
    pub port: Option<u16>,

    /// override the node level (1-5)
    #[argh(option, short = 'l')]
    pub level: Option<i64>,

    /// base64 chain secret key; overrides the PRIVATE_KEY env var
    #[argh(option)]
    pub private_key: Option<String>,
}
