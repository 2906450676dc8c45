//! safesend-storage: OpenDAL S3 operator, presigned grants, bucket policies

pub mod operator;
pub mod policy;
pub mod presign;

pub use operator::{
    build_from_core_config, build_operator, build_operator_from_env, probe_bucket, S3Credentials,
};
pub use presign::Presigner;
