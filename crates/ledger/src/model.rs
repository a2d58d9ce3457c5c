//! Ledger records and their storage encoding.

use dogeledger_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use dogeledger_primitives::{hash256_to_hex, Address, CoinAmount, Hash256, OutPoint};

fn write_address(encoder: &mut Encoder, address: &Address) {
    encoder.write_var_str(address.as_str());
}

fn read_address(decoder: &mut Decoder) -> Result<Address, DecodeError> {
    Ok(Address::new(decoder.read_var_str()?))
}

fn write_opt_hash(encoder: &mut Encoder, hash: Option<&Hash256>) {
    match hash {
        Some(hash) => {
            encoder.write_u8(1);
            encoder.write_hash(hash);
        }
        None => encoder.write_u8(0),
    }
}

fn read_opt_hash(decoder: &mut Decoder) -> Result<Option<Hash256>, DecodeError> {
    if decoder.read_bool()? {
        Ok(Some(decoder.read_hash()?))
    } else {
        Ok(None)
    }
}

/// A merchant HD wallet root. `id` is the root address and never changes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Account {
    pub id: Address,
    pub foreign_id: String,
    pub privkey: String,
    pub next_internal_key: u32,
    pub next_external_key: u32,
    pub next_pool_internal: u32,
    pub next_pool_external: u32,
    pub payout_address: Option<Address>,
    pub payout_threshold: CoinAmount,
    pub payout_frequency: String,
    /// Bumped by the store whenever chain-derived state of the account changes.
    pub chain_seq: u64,
}

impl Account {
    pub fn new(id: impl Into<Address>, foreign_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            foreign_id: foreign_id.into(),
            ..Self::default()
        }
    }
}

impl Encodable for Account {
    fn encode_into(&self, encoder: &mut Encoder) {
        write_address(encoder, &self.id);
        encoder.write_var_str(&self.foreign_id);
        encoder.write_var_str(&self.privkey);
        encoder.write_u32_le(self.next_internal_key);
        encoder.write_u32_le(self.next_external_key);
        encoder.write_u32_le(self.next_pool_internal);
        encoder.write_u32_le(self.next_pool_external);
        encoder.write_opt_str(self.payout_address.as_ref().map(Address::as_str));
        encoder.write_i64_le(self.payout_threshold);
        encoder.write_var_str(&self.payout_frequency);
        encoder.write_u64_le(self.chain_seq);
    }
}

impl Decodable for Account {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            id: read_address(decoder)?,
            foreign_id: decoder.read_var_str()?,
            privkey: decoder.read_var_str()?,
            next_internal_key: decoder.read_u32_le()?,
            next_external_key: decoder.read_u32_le()?,
            next_pool_internal: decoder.read_u32_le()?,
            next_pool_external: decoder.read_u32_le()?,
            payout_address: decoder.read_opt_str()?.map(Address::new),
            payout_threshold: decoder.read_i64_le()?,
            payout_frequency: decoder.read_var_str()?,
            chain_seq: decoder.read_u64_le()?,
        })
    }
}

/// Reverse-index entry: one derived address and its position in the owning wallet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressRecord {
    pub address: Address,
    pub account: Address,
    pub key_index: u32,
    pub is_internal: bool,
}

impl Encodable for AddressRecord {
    fn encode_into(&self, encoder: &mut Encoder) {
        write_address(encoder, &self.address);
        write_address(encoder, &self.account);
        encoder.write_u32_le(self.key_index);
        encoder.write_bool(self.is_internal);
    }
}

impl Decodable for AddressRecord {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            address: read_address(decoder)?,
            account: read_address(decoder)?,
            key_index: decoder.read_u32_le()?,
            is_internal: decoder.read_bool()?,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineItem {
    pub kind: String,
    pub name: String,
    pub sku: String,
    pub description: String,
    pub value: CoinAmount,
    pub quantity: u32,
    pub image_link: String,
}

impl LineItem {
    pub fn total(&self) -> CoinAmount {
        self.value.saturating_mul(CoinAmount::from(self.quantity))
    }
}

impl Encodable for LineItem {
    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_var_str(&self.kind);
        encoder.write_var_str(&self.name);
        encoder.write_var_str(&self.sku);
        encoder.write_var_str(&self.description);
        encoder.write_i64_le(self.value);
        encoder.write_u32_le(self.quantity);
        encoder.write_var_str(&self.image_link);
    }
}

impl Decodable for LineItem {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            kind: decoder.read_var_str()?,
            name: decoder.read_var_str()?,
            sku: decoder.read_var_str()?,
            description: decoder.read_var_str()?,
            value: decoder.read_i64_le()?,
            quantity: decoder.read_u32_le()?,
            image_link: decoder.read_var_str()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvoiceStatus {
    Open,
    Paid,
}

/// A payment request. `id` is the receiving address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Invoice {
    pub id: Address,
    pub account: Address,
    pub key_index: u32,
    pub tx: String,
    pub items: Vec<LineItem>,
    /// Required confirmations; zero or negative defers to the configured default.
    pub confirmations: i32,
    pub created: u64,
    pub paid: bool,
}

impl Invoice {
    pub fn total(&self) -> CoinAmount {
        self.items
            .iter()
            .fold(0, |total: CoinAmount, item| total.saturating_add(item.total()))
    }

    pub fn status(&self) -> InvoiceStatus {
        if self.paid {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Open
        }
    }

    pub fn required_confirmations(&self, default_confirmations: u32) -> u32 {
        if self.confirmations > 0 {
            self.confirmations as u32
        } else {
            default_confirmations
        }
    }
}

impl Encodable for Invoice {
    fn encode_into(&self, encoder: &mut Encoder) {
        write_address(encoder, &self.id);
        write_address(encoder, &self.account);
        encoder.write_u32_le(self.key_index);
        encoder.write_var_str(&self.tx);
        encoder.write_varint(self.items.len() as u64);
        for item in &self.items {
            item.encode_into(encoder);
        }
        encoder.write_i32_le(self.confirmations);
        encoder.write_u64_le(self.created);
        encoder.write_bool(self.paid);
    }
}

impl Decodable for Invoice {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let id = read_address(decoder)?;
        let account = read_address(decoder)?;
        let key_index = decoder.read_u32_le()?;
        let tx = decoder.read_var_str()?;
        let count = decoder.read_varint()?;
        if count > u64::from(u16::MAX) {
            return Err(DecodeError::SizeTooLarge);
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(LineItem::decode_from(decoder)?);
        }
        Ok(Self {
            id,
            account,
            key_index,
            tx,
            items,
            confirmations: decoder.read_i32_le()?,
            created: decoder.read_u64_le()?,
            paid: decoder.read_bool()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UtxoStatus {
    Pending,
    Confirmed,
    Spent,
    /// Heights cleared by a reorg; waiting to be seen again.
    Detached,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: CoinAmount,
    pub script_type: String,
    pub pkh_address: Address,
    pub account: Address,
    pub key_index: u32,
    pub is_internal: bool,
    pub created_height: Option<i64>,
    /// Height at which the output reached the confirmation threshold.
    pub spendable_height: Option<i64>,
    pub spent_height: Option<i64>,
    /// Outgoing transaction that reserved this output.
    pub spending_txid: Option<Hash256>,
}

impl Utxo {
    pub fn status(&self) -> UtxoStatus {
        if self.created_height.is_none() {
            UtxoStatus::Detached
        } else if self.spent_height.is_some() {
            UtxoStatus::Spent
        } else if self.spendable_height.is_some() {
            UtxoStatus::Confirmed
        } else {
            UtxoStatus::Pending
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.spending_txid.is_some()
    }

    /// Confirmation depth at `best_height`, counting the creating block as zero.
    pub fn depth_at(&self, best_height: i64) -> Option<i64> {
        self.created_height
            .filter(|created| *created <= best_height)
            .map(|created| best_height - created)
    }
}

impl Encodable for Utxo {
    fn encode_into(&self, encoder: &mut Encoder) {
        self.outpoint.encode_into(encoder);
        encoder.write_i64_le(self.value);
        encoder.write_var_str(&self.script_type);
        write_address(encoder, &self.pkh_address);
        write_address(encoder, &self.account);
        encoder.write_u32_le(self.key_index);
        encoder.write_bool(self.is_internal);
        encoder.write_opt_i64(self.created_height);
        encoder.write_opt_i64(self.spendable_height);
        encoder.write_opt_i64(self.spent_height);
        write_opt_hash(encoder, self.spending_txid.as_ref());
    }
}

impl Decodable for Utxo {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            outpoint: OutPoint::decode_from(decoder)?,
            value: decoder.read_i64_le()?,
            script_type: decoder.read_var_str()?,
            pkh_address: read_address(decoder)?,
            account: read_address(decoder)?,
            key_index: decoder.read_u32_le()?,
            is_internal: decoder.read_bool()?,
            created_height: decoder.read_opt_i64()?,
            spendable_height: decoder.read_opt_i64()?,
            spent_height: decoder.read_opt_i64()?,
            spending_txid: read_opt_hash(decoder)?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxnStatus {
    Unsent,
    OnChain,
    Confirmed,
}

/// An outgoing payment built from the account's UTXOs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Txn {
    pub id: Hash256,
    pub account: Address,
    pub amount: CoinAmount,
    pub fee: CoinAmount,
    pub inputs: Vec<OutPoint>,
    pub created: u64,
    pub on_chain_height: Option<i64>,
    pub confirmed_height: Option<i64>,
}

impl Txn {
    pub fn status(&self) -> TxnStatus {
        match (self.on_chain_height, self.confirmed_height) {
            (Some(_), Some(_)) => TxnStatus::Confirmed,
            (Some(_), None) => TxnStatus::OnChain,
            _ => TxnStatus::Unsent,
        }
    }

    pub fn id_hex(&self) -> String {
        hash256_to_hex(&self.id)
    }
}

impl Encodable for Txn {
    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.id);
        write_address(encoder, &self.account);
        encoder.write_i64_le(self.amount);
        encoder.write_i64_le(self.fee);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode_into(encoder);
        }
        encoder.write_u64_le(self.created);
        encoder.write_opt_i64(self.on_chain_height);
        encoder.write_opt_i64(self.confirmed_height);
    }
}

impl Decodable for Txn {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let id = decoder.read_hash()?;
        let account = read_address(decoder)?;
        let amount = decoder.read_i64_le()?;
        let fee = decoder.read_i64_le()?;
        let count = decoder.read_varint()?;
        if count > u64::from(u16::MAX) {
            return Err(DecodeError::SizeTooLarge);
        }
        let mut inputs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            inputs.push(OutPoint::decode_from(decoder)?);
        }
        Ok(Self {
            id,
            account,
            amount,
            fee,
            inputs,
            created: decoder.read_u64_le()?,
            on_chain_height: decoder.read_opt_i64()?,
            confirmed_height: decoder.read_opt_i64()?,
        })
    }
}

/// Sync checkpoint; read at startup to resume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainState {
    pub best_block_hash: Hash256,
    pub best_block_height: i64,
}

impl Encodable for ChainState {
    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.best_block_hash);
        encoder.write_i64_le(self.best_block_height);
    }
}

impl Decodable for ChainState {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            best_block_hash: decoder.read_hash()?,
            best_block_height: decoder.read_i64_le()?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AddressBlock {
    pub addr: Address,
    pub height: i64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AccountBalance {
    /// Seen on chain, below the confirmation threshold.
    pub incoming: CoinAmount,
    /// Confirmed, unspent and unreserved.
    pub current: CoinAmount,
    /// Reserved by outgoing transactions not yet spent on chain.
    pub outgoing: CoinAmount,
}
