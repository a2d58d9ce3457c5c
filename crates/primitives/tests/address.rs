use dogeledger_primitives::{
    address_to_script_pubkey, classify_script_pubkey, hash160, script_pubkey_to_address, Address,
    AddressError, AddressKind, Base58Error, Network, ScriptType,
};

fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

#[test]
fn mainnet_and_testnet_prefix_characters() {
    let hash = [0x42u8; 20];
    let main = Address::from_pubkey_hash(&hash, Network::Mainnet);
    assert!(main.as_str().starts_with('D'), "{main}");
    let test = Address::from_pubkey_hash(&hash, Network::Testnet);
    assert!(test.as_str().starts_with('n'), "{test}");
    let script = Address::from_script_hash(&hash, Network::Mainnet);
    assert!(script.as_str().starts_with('9') || script.as_str().starts_with('A'));
}

#[test]
fn decode_recovers_kind_and_hash() {
    let hash = [0x07u8; 20];
    let address = Address::from_pubkey_hash(&hash, Network::Mainnet);
    assert_eq!(
        address.decode(Network::Mainnet),
        Ok((AddressKind::PubkeyHash, hash))
    );
    let p2sh = Address::from_script_hash(&hash, Network::Regtest);
    assert_eq!(
        p2sh.decode(Network::Regtest),
        Ok((AddressKind::ScriptHash, hash))
    );
}

#[test]
fn decode_rejects_wrong_network() {
    let address = Address::from_pubkey_hash(&[0x01; 20], Network::Mainnet);
    assert_eq!(
        address.decode(Network::Testnet),
        Err(AddressError::UnknownPrefix(0x1e))
    );
    assert!(!address.is_valid(Network::Testnet));
}

#[test]
fn bitcoin_address_is_unknown_prefix() {
    let address = Address::from("1AGNa15ZQXAZUgFiqJ2i7Z2DPU2J6hW62i");
    assert_eq!(
        address.decode(Network::Mainnet),
        Err(AddressError::UnknownPrefix(0x00))
    );
}

#[test]
fn corrupted_address_reports_checksum() {
    let address = Address::from_pubkey_hash(&[0x09; 20], Network::Mainnet);
    let mut chars: Vec<char> = address.as_str().chars().collect();
    let last = chars.len() - 1;
    chars[last] = if chars[last] == 'z' { 'y' } else { 'z' };
    let corrupted = Address::new(chars.into_iter().collect::<String>());
    assert_eq!(
        corrupted.decode(Network::Mainnet),
        Err(AddressError::Base58(Base58Error::InvalidChecksum))
    );
}

#[test]
fn script_round_trips() {
    let pubkey = [0x02u8; 33];
    let hash = hash160(&pubkey);
    let script = p2pkh_script(&hash);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pkh);
    let address = script_pubkey_to_address(&script, Network::Mainnet).expect("address");
    assert_eq!(address, Address::from_pubkey(&pubkey, Network::Mainnet));
    assert_eq!(
        address_to_script_pubkey(&address, Network::Mainnet).expect("script"),
        script
    );

    let mut p2pk = vec![33u8];
    p2pk.extend_from_slice(&pubkey);
    p2pk.push(0xac);
    assert_eq!(classify_script_pubkey(&p2pk), ScriptType::P2Pk);
    assert_eq!(
        script_pubkey_to_address(&p2pk, Network::Mainnet),
        Some(address)
    );

    let p2sh_address = Address::from_script_hash(&[0x33; 20], Network::Testnet);
    let p2sh = address_to_script_pubkey(&p2sh_address, Network::Testnet).expect("p2sh");
    assert_eq!(classify_script_pubkey(&p2sh), ScriptType::P2Sh);
    assert_eq!(
        script_pubkey_to_address(&p2sh, Network::Testnet),
        Some(p2sh_address)
    );
}

#[test]
fn nonstandard_scripts_have_no_address() {
    assert_eq!(classify_script_pubkey(&[0x6a, 0x04, 1, 2, 3, 4]), ScriptType::NullData);
    assert_eq!(classify_script_pubkey(&[0x51]), ScriptType::Unknown);
    assert_eq!(script_pubkey_to_address(&[0x51], Network::Mainnet), None);
}
