use super::{LedgerClient, TransferReceipt};
use crate::config::LedgerConfig;
use crate::error::{FaucetError, FaucetResult, LedgerError};
use async_trait::async_trait;
use drip_common::Address;
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use serde_json::{json, Value};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Ethereum JSON-RPC ledger client signing legacy EIP-155 transfers
pub struct JsonRpcLedgerClient {
    rpc_url: String,
    client: reqwest::Client,
    signing_key: SigningKey,
    address: Address,
    config: LedgerConfig,
    chain_id: OnceCell<u64>,
    /// Serializes nonce lookup through broadcast so concurrent transfers
    /// never reuse a nonce.
    submit_lock: Mutex<()>,
}

impl JsonRpcLedgerClient {
    pub fn new(
        rpc_url: String,
        private_key: &str,
        config: LedgerConfig,
        chain_id: Option<u64>,
    ) -> FaucetResult<Self> {
        let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| FaucetError::Configuration(format!("Invalid private key: {}", e)))?;
        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|e| FaucetError::Configuration(format!("Invalid signing key: {}", e)))?;

        let address = derive_address(&signing_key);
        info!("Faucet address: {}", address);

        let chain_id = match chain_id {
            Some(id) => OnceCell::new_with(Some(id)),
            None => OnceCell::new(),
        };

        Ok(Self {
            rpc_url,
            client: reqwest::Client::new(),
            signing_key,
            address,
            config,
            chain_id,
            submit_lock: Mutex::new(()),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(format!("Request failed: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(LedgerError::Rpc(error.to_string()));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, LedgerError> {
        let result = self.call(method, params).await?;
        parse_quantity(&result)
    }

    pub async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.chain_id
            .get_or_try_init(|| async {
                let id = self.quantity("eth_chainId", json!([])).await?;
                u64::try_from(id).map_err(|_| LedgerError::InvalidResponse(format!("chain id {}", id)))
            })
            .await
            .copied()
    }

    async fn pending_nonce(&self) -> Result<u64, LedgerError> {
        let nonce = self
            .quantity("eth_getTransactionCount", json!([self.address.to_string(), "pending"]))
            .await?;
        u64::try_from(nonce).map_err(|_| LedgerError::InvalidResponse(format!("nonce {}", nonce)))
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        match &self.config.gas_price {
            Some(price) => price
                .parse::<u128>()
                .map_err(|_| LedgerError::Signing(format!("Invalid gas price: {}", price))),
            None => self.quantity("eth_gasPrice", json!([])).await,
        }
    }

    async fn block_number(&self) -> Result<u128, LedgerError> {
        self.quantity("eth_blockNumber", json!([])).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, LedgerError> {
        let result = self
            .call("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::InvalidResponse("missing transaction hash".to_string()))
    }

    async fn submit(&self, to: &Address, amount: u128) -> Result<String, LedgerError> {
        let _guard = self.submit_lock.lock().await;

        let chain_id = self.chain_id().await?;
        let nonce = self.pending_nonce().await?;
        let gas_price = self.gas_price().await?;

        let tx = LegacyTransfer {
            nonce,
            gas_price,
            gas_limit: self.config.gas_limit,
            to: *to,
            value: amount,
            chain_id,
        };
        let raw = tx.sign(&self.signing_key)?;
        let tx_hash = self.send_raw_transaction(&raw).await?;

        info!(nonce, %to, tx_hash = %tx_hash, "Transaction sent");
        Ok(tx_hash)
    }

    /// Polls until the receipt exists and has the configured number of
    /// confirmations. Callers bound this with a timeout.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Value, LedgerError> {
        loop {
            let receipt = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;

            if !receipt.is_null() {
                let included_at = receipt
                    .get("blockNumber")
                    .filter(|block| !block.is_null())
                    .map(parse_quantity)
                    .transpose()?;

                if let Some(block) = included_at {
                    let confirmations = self.block_number().await?.saturating_sub(block) + 1;
                    if confirmations >= u128::from(self.config.confirmations) {
                        return Ok(receipt);
                    }
                    debug!(tx_hash, confirmations = %confirmations, "Waiting for more confirmations");
                }
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    fn address(&self) -> Address {
        self.address
    }

    async fn balance(&self) -> Result<u128, LedgerError> {
        self.quantity("eth_getBalance", json!([self.address.to_string(), "latest"]))
            .await
    }

    async fn transfer(&self, to: &Address, amount: u128) -> Result<TransferReceipt, LedgerError> {
        let tx_hash = self.submit(to, amount).await?;
        let receipt = self.wait_for_receipt(&tx_hash).await?;

        let status = receipt
            .get("status")
            .filter(|status| !status.is_null())
            .map(parse_quantity)
            .transpose()?;
        let reference = receipt
            .get("transactionHash")
            .and_then(Value::as_str)
            .unwrap_or(&tx_hash)
            .to_string();

        match status {
            Some(1) => Ok(TransferReceipt::confirmed(reference)),
            other => {
                warn!(tx_hash = %reference, status = ?other, "Transaction not successful");
                Ok(TransferReceipt::failed(reference, "transaction reverted"))
            }
        }
    }
}

/// Unsigned legacy value transfer
#[derive(Debug, Clone)]
struct LegacyTransfer {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: Address,
    value: u128,
    chain_id: u64,
}

impl LegacyTransfer {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&trimmed(&self.gas_price.to_be_bytes()));
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&trimmed(&self.value.to_be_bytes()));
        stream.append(&Vec::<u8>::new()); // data
    }

    /// EIP-155 signing hash
    fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keccak_hash::keccak(stream.out()).0
    }

    /// Signed RLP ready for `eth_sendRawTransaction`
    fn sign(&self, key: &SigningKey) -> Result<Vec<u8>, LedgerError> {
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&self.signing_hash())
            .map_err(|e| LedgerError::Signing(e.to_string()))?;
        let (r, s) = signature.split_bytes();
        let v = u64::from(recovery_id.to_byte()) + 35 + self.chain_id * 2;

        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&trimmed(&r));
        stream.append(&trimmed(&s));
        Ok(stream.out().to_vec())
    }
}

/// Big-endian integer bytes without leading zeros, as RLP expects
fn trimmed(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn parse_quantity(value: &Value) -> Result<u128, LedgerError> {
    let text = value
        .as_str()
        .ok_or_else(|| LedgerError::InvalidResponse(format!("expected hex quantity, got {}", value)))?;
    let digits = text.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|_| LedgerError::InvalidResponse(format!("invalid quantity {}", text)))
}

fn derive_address(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak_hash::keccak(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash.0[12..]);
    Address(bytes)
}
