use crate::nms::ParameterLookup;

/// Hard upper bound on lookups per trend request, imposed by the
/// remote query service's payload limits.
pub const BATCH_SIZE: usize = 25;

/// Build one lookup per row key and split them into request-safe
/// batches of at most [`BATCH_SIZE`], preserving input order.
pub fn partition_lookups<S: AsRef<str>>(parameter_id: u32, keys: &[S]) -> Vec<Vec<ParameterLookup>> {
    let lookups: Vec<ParameterLookup> = keys
        .iter()
        .map(|key| ParameterLookup::new(parameter_id, key.as_ref()))
        .collect();

    lookups
        .chunks(BATCH_SIZE)
        .map(<[ParameterLookup]>::to_vec)
        .collect()
}
