use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

/// EIP-1014 CREATE2 address: `keccak256(0xff ++ deployer ++ salt ++
/// keccak256(init_code))`, truncated to the low 160 bits.
pub fn create2_address(deployer: Address, salt: H256, init_code: &[u8]) -> Address {
    let init_code_hash = keccak256(init_code);
    let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
    preimage.push(0xff);
    preimage.extend_from_slice(deployer.as_bytes());
    preimage.extend_from_slice(salt.as_bytes());
    preimage.extend_from_slice(&init_code_hash);
    Address::from_slice(&keccak256(preimage)[12..])
}

/// Counterfactual address of a proxy wallet deployed through the factory's
/// `createProxyWithNonce(singleton, initializer, saltNonce)`.
///
/// The factory chains two levels of salting: the effective CREATE2 salt is
/// `keccak256(keccak256(initializer) ++ uint256(saltNonce))`, and the
/// deployment data is the proxy creation code with the singleton address
/// appended as the sole constructor argument.
///
/// Must stay byte-compatible with the on-chain factory: a divergence yields a
/// plausible-looking but nonexistent address with no error signal.
pub fn proxy_address(
    factory: Address,
    proxy_creation_code: &Bytes,
    singleton: Address,
    initializer: &Bytes,
    salt_nonce: U256,
) -> Address {
    let mut salt_preimage = [0u8; 64];
    salt_preimage[..32].copy_from_slice(&keccak256(initializer.as_ref()));
    salt_nonce.to_big_endian(&mut salt_preimage[32..]);
    let salt = H256::from(keccak256(salt_preimage));

    // abi.encode(address) pads to a full 32-byte word.
    let mut deployment_data =
        Vec::with_capacity(proxy_creation_code.len() + 32);
    deployment_data.extend_from_slice(proxy_creation_code.as_ref());
    deployment_data.extend_from_slice(&[0u8; 12]);
    deployment_data.extend_from_slice(singleton.as_bytes());

    create2_address(factory, salt, &deployment_data)
}
