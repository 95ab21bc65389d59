//! Chain metadata: the last committed (height, app hash, dirty) record and the
//! persisted network parameters.

use borsh::{BorshDeserialize, BorshSerialize};
use eyre::Result as EyreResult;
use meridian_primitives::hash::Hash;
use meridian_primitives::params::NetworkParameters;

use crate::db::Column;
use crate::error::DbError;
use crate::state::{ReadAccess, WriteAccess};

const CHAIN_STATE_KEY: &[u8] = b"chain_state";
const PARAMS_KEY: &[u8] = b"network_params";

/// The persisted chain head.
///
/// `dirty` is set while a block's state changes are durable but its final
/// app hash has not been written yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainState {
    pub height: i64,
    pub app_hash: Hash,
    pub dirty: bool,
}

pub fn get_chain_state<T: ReadAccess + ?Sized>(tx: &T) -> EyreResult<Option<ChainState>> {
    let Some(raw) = tx.get(Column::Meta, CHAIN_STATE_KEY)? else {
        return Ok(None);
    };

    let state = borsh::from_slice(&raw).map_err(|err| DbError::corrupt(Column::Meta, err))?;

    Ok(Some(state))
}

pub fn set_chain_state<T: WriteAccess + ?Sized>(
    tx: &mut T,
    height: i64,
    app_hash: Hash,
    dirty: bool,
) -> EyreResult<()> {
    let state = ChainState {
        height,
        app_hash,
        dirty,
    };

    tx.put(Column::Meta, CHAIN_STATE_KEY, borsh::to_vec(&state)?);

    Ok(())
}

/// Returns `None` until parameters have been stored once.
pub fn load_params<T: ReadAccess + ?Sized>(tx: &T) -> EyreResult<Option<NetworkParameters>> {
    let Some(raw) = tx.get(Column::Meta, PARAMS_KEY)? else {
        return Ok(None);
    };

    let params = borsh::from_slice(&raw).map_err(|err| DbError::corrupt(Column::Meta, err))?;

    Ok(Some(params))
}

pub fn store_params<T: WriteAccess + ?Sized>(
    tx: &mut T,
    params: &NetworkParameters,
) -> EyreResult<()> {
    tx.put(Column::Meta, PARAMS_KEY, borsh::to_vec(params)?);

    Ok(())
}
