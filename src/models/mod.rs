pub mod contact;
pub mod loan;
pub mod repayment;

pub use contact::{Contact, ContactUpdate, NewContact};
pub use loan::{Loan, LoanUpdate, NewLoan};
pub use repayment::{NewRepayment, Repayment};

use serde::{Deserialize, Deserializer};

/// 更新用DTOの「クリア可能な任意項目」をデシリアライズする
///
/// `#[serde(default)]` と組み合わせて使用する:
/// - フィールドなし → `None`（変更しない）
/// - `null` → `Some(None)`（値をクリア）
/// - 値あり → `Some(Some(value))`
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
