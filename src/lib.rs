pub(crate) mod data {
    pub(crate) mod datasources {
        pub(crate) mod app_store_server_api_datasource;
        pub(crate) mod app_store_server_notification_datasource;
        pub(crate) mod signed_data_verifier;
    }
    pub(crate) mod models {
        pub(crate) mod app_store_server_api {
            pub(crate) mod common;
            pub(crate) mod jws_renewal_info_decoded_payload_model;
            pub(crate) mod jws_transaction_decoded_payload_model;
            pub(crate) mod transaction_info_response_model;
        }
        pub(crate) mod app_store_server_notifications {
            pub(crate) mod response_body_v2_decoded_payload_model;
            pub(crate) mod response_body_v2_model;
        }
    }
    pub(crate) mod repositories {
        pub(crate) mod app_store_repository_impl;
    }
}

pub mod domain {
    pub mod entities {
        pub mod app_store_transaction;
        pub mod audit_record;
        pub mod entitlement;
        pub mod notification_log_entry;
        pub mod pending_receipt;
        pub mod plan;
        pub mod server_notification;
        pub mod subscription;
    }
    pub mod repositories {
        pub mod app_store_repository;
        pub mod entity_store;
    }
    pub mod usecases {
        pub mod audit_log;
        pub mod notification_handlers;
        pub mod notification_ingest;
        pub mod plan_catalog;
        pub mod plan_resolver;
        pub mod receipt_reconciliation;
        pub mod subscription_lifecycle;
        pub mod transaction_locks;
    }
}

pub mod config;
pub mod errors;
pub mod http;
pub mod storage;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;
