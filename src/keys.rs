//! Where a tensor's durable objects live inside the key-value store.
//!
//! All keys are derived from the tensor key, so two tensors never share
//! storage and a tensor can be relocated by moving one directory.

pub const TENSOR_META_FILENAME: &str = "tensor_meta.json";
pub const CHUNK_ID_ENCODER_FILENAME: &str = "chunk_id_encoder";
pub const CHUNKS_FOLDER: &str = "chunks";

pub fn tensor_meta_key(tensor_key: &str) -> String {
    format!("{}/{}", tensor_key, TENSOR_META_FILENAME)
}

pub fn chunk_id_encoder_key(tensor_key: &str) -> String {
    format!("{}/{}", tensor_key, CHUNK_ID_ENCODER_FILENAME)
}

pub fn chunk_key(tensor_key: &str, chunk_name: &str) -> String {
    format!("{}/{}/{}", tensor_key, CHUNKS_FOLDER, chunk_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_scoped_to_the_tensor() {
        assert_eq!(tensor_meta_key("images"), "images/tensor_meta.json");
        assert_eq!(chunk_id_encoder_key("images"), "images/chunk_id_encoder");
        assert_eq!(
            chunk_key("images", "00000000deadbeef"),
            "images/chunks/00000000deadbeef"
        );
    }
}
