// Entry point for the pow-ledger CLI
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, LevelFilter};
use pow_ledger::{
    address_to_pub_key_hash, convert_address, hash_pub_key, Block, Blockchain, BlockchainError,
    Command, Opt, ProofOfWork, SledStore, Transaction, UTXOSet, Wallets, GLOBAL_CONFIG,
};
use std::process;
use std::sync::Arc;

fn main() {
    // Info by default, RUST_LOG still wins
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    // I parse the command line with clap; every subcommand maps to one ledger operation
    let opt = Opt::parse();

    // I load ledger.toml and the LEDGER_* overrides before touching any storage
    if let Err(e) = GLOBAL_CONFIG.load_from_environment() {
        error!("Error: {e}");
        process::exit(1);
    }

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn proof_of_work() -> pow_ledger::Result<ProofOfWork> {
    ProofOfWork::new(GLOBAL_CONFIG.get_difficulty_bits())
}

fn open_store() -> pow_ledger::Result<Arc<SledStore>> {
    Ok(Arc::new(SledStore::open(&GLOBAL_CONFIG.get_chain_path())?))
}

// I open an existing chain here; creating one is only done by createblockchain
fn open_blockchain() -> pow_ledger::Result<Blockchain> {
    Blockchain::open(open_store()?, proof_of_work()?, GLOBAL_CONFIG.get_subsidy())
}

fn print_block(block: &Block, pow_valid: bool) {
    println!("Prev. hash: {}", HEXLOWER.encode(block.get_prev_hash()));
    println!("Hash: {}", block.get_hash_hex());
    println!("Timestamp: {}", block.get_timestamp());
    println!("Nonce: {}", block.get_nonce());
    println!("PoW: {pow_valid}");

    for tx in block.get_transactions() {
        println!("- Transaction {}", HEXLOWER.encode(tx.get_id()));
        if !tx.is_coinbase() {
            for input in tx.get_vin() {
                let from = convert_address(hash_pub_key(input.get_pub_key()).as_slice());
                println!(
                    "-- Input txid = {}, vout = {}, from = {from}",
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout(),
                )
            }
        }
        for output in tx.get_vout() {
            let to = convert_address(output.get_pub_key_hash());
            println!("-- Output value = {}, to = {to}", output.get_value())
        }
    }
    println!()
}

fn block_json(block: &Block, pow_valid: bool) -> serde_json::Value {
    let transactions: Vec<serde_json::Value> = block
        .get_transactions()
        .iter()
        .map(|tx| {
            serde_json::json!({
                "id": HEXLOWER.encode(tx.get_id()),
                "coinbase": tx.is_coinbase(),
                "inputs": tx.get_vin().iter().map(|input| serde_json::json!({
                    "txid": HEXLOWER.encode(input.get_txid()),
                    "vout": input.get_vout(),
                })).collect::<Vec<_>>(),
                "outputs": tx.get_vout().iter().map(|output| serde_json::json!({
                    "value": output.get_value(),
                    "to": convert_address(output.get_pub_key_hash()),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::json!({
        "prev_hash": HEXLOWER.encode(block.get_prev_hash()),
        "hash": block.get_hash_hex(),
        "timestamp": block.get_timestamp(),
        "nonce": block.get_nonce(),
        "pow_valid": pow_valid,
        "transactions": transactions,
    })
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createwallet => {
            // I generate a fresh P-256 key pair and persist it with the others
            let mut wallets = Wallets::load(&GLOBAL_CONFIG.get_wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&GLOBAL_CONFIG.get_wallet_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Createblockchain { address } => {
            // I decode the address first so a typo never mines a genesis block
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let store = open_store()?;
            let blockchain = Blockchain::open_or_create(
                store,
                proof_of_work()?,
                GLOBAL_CONFIG.get_subsidy(),
                &pub_key_hash,
            )?;
            info!("Chain tip: {}", HEXLOWER.encode(&blockchain.get_tip_hash()));
            println!("Done!");
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            // I walk the whole chain: a balance has to see every unspent output
            let utxo_set = UTXOSet::new(open_blockchain()?);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of '{address}': {balance}");
        }
        Command::Send { from, to, amount } => {
            let to_pub_key_hash = address_to_pub_key_hash(&to)?;
            address_to_pub_key_hash(&from)?;
            if amount == 0 {
                return Err("Amount must be positive".into());
            }

            // I can only sign for addresses whose keys live in my wallet file
            let wallets = Wallets::load(&GLOBAL_CONFIG.get_wallet_path())?;
            let wallet = wallets.get_wallet(&from).ok_or_else(|| {
                BlockchainError::Wallet(format!("Wallet not found for address: {from}"))
            })?;

            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction =
                Transaction::new_transfer(wallet, &to_pub_key_hash, amount, &utxo_set)?;

            // The transfer is mined straight away: there is no pool to wait in
            let block = blockchain.append(&[transaction])?;
            info!("Transfer committed in block {}", block.get_hash_hex());
            println!("Success!")
        }
        Command::Printchain { json } => {
            let blockchain = open_blockchain()?;
            let pow = blockchain.get_proof_of_work();
            for block in blockchain.iterator() {
                let block = block?;
                // I recheck every block's proof so tampering shows up in the listing
                let pow_valid = pow.validate(&block);
                if json {
                    println!("{}", block_json(&block, pow_valid));
                } else {
                    print_block(&block, pow_valid);
                }
            }
        }
        Command::Verifychain => {
            let blockchain = open_blockchain()?;
            let count = blockchain.verify_chain()?;
            println!("Chain OK: {count} blocks verified.");
        }
    }
    Ok(())
}
