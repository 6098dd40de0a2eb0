use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pow-ledger", about = "A single-writer proof-of-work UTXO ledger")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(long, help = "The address to send the genesis block reward to")]
        address: String,
    },
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(long, help = "The wallet address")]
        address: String,
    },
    #[command(
        name = "send",
        alias = "addblock",
        about = "Send coins between addresses and mine the block holding the transfer"
    )]
    Send {
        #[arg(long, help = "Source wallet address")]
        from: String,
        #[arg(long, help = "Destination wallet address")]
        to: String,
        #[arg(long, help = "Amount to send")]
        amount: u64,
    },
    #[command(name = "printchain", about = "Print all blocks from tip to genesis")]
    Printchain {
        #[arg(long, help = "Print blocks as JSON, one per line")]
        json: bool,
    },
    #[command(
        name = "verifychain",
        about = "Check proof of work and links of every stored block"
    )]
    Verifychain,
}
