mod credits;
mod packages;
mod transactions;

pub use credits::CreditLedger;
pub use packages::{default_packages, find_package, list_packages, replace_packages, CreditPackage};
pub use transactions::{
    list_transactions, record_transaction, transactions_for, Transaction, TransactionKind,
};
