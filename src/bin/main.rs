fn main() {
  utxo_indexer::main();
}
