use accelerate_types::{SchemaHash, TransactionId};

/// URL a client uses to address an open transaction.
///
/// `{scheme}://{host}/{client_version}/{hash}/itx/{id}`, mirroring the path
/// the transaction was started on. The client appends `/graphql`,
/// `/commit` or `/rollback`.
pub fn continuation_endpoint(
    scheme: &str,
    host: &str,
    client_version: &str,
    hash: &SchemaHash,
    id: &TransactionId,
) -> String {
    format!(
        "{}://{}/{}/{}/itx/{}",
        scheme, host, client_version, hash, id
    )
}
