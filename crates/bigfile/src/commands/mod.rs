pub mod extract;
pub mod list;
pub mod pack;
pub mod repack;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Print the directory tree of an archive
    List(list::ListArgs),
    /// Extract an archive, or a single file from it, into a directory
    Extract(extract::ExtractArgs),
    /// Pack a directory into a new archive
    Pack(pack::PackArgs),
    /// Rewrite archives while converting their image tiles
    Repack(repack::RepackArgs),
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::List(list) => list.handle(),
            Commands::Extract(extract) => extract.handle(),
            Commands::Pack(pack) => pack.handle(),
            Commands::Repack(repack) => repack.handle(),
        }
    }
}
