//! 台帳の集計処理
//!
//! 生の連絡先・貸付・返済レコードから残高や状態を導出する純粋関数群。
//! 金額の合計はすべて `Decimal` で行う。

use super::models::{
    ContactSummary, GlobalTotals, LoanDetails, LoanStatus, LoanWithDetails, SortDirection,
    SortOption,
};
use crate::models::{Contact, Loan, Repayment};
use crate::storage::{contact_order, loan_order};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// 貸付の導出値を計算する
///
/// # 引数
/// * `loan` - 対象の貸付
/// * `repayments` - 返済（`loan_id` が一致するものだけが集計される）
/// * `now` - 期日超過の判定に使う現在時刻
pub fn compute_loan_details(
    loan: &Loan,
    repayments: &[Repayment],
    now: DateTime<Utc>,
) -> LoanDetails {
    let total_paid = repayments
        .iter()
        .filter(|repayment| repayment.loan_id == loan.id)
        .map(|repayment| repayment.amount)
        .sum();
    details_from_total(loan, total_paid, now)
}

fn details_from_total(loan: &Loan, total_paid: Decimal, now: DateTime<Utc>) -> LoanDetails {
    let balance_due = loan.amount - total_paid;

    let status = if balance_due <= Decimal::ZERO {
        LoanStatus::Repaid
    } else if total_paid.is_zero() {
        LoanStatus::Pending
    } else {
        LoanStatus::Partial
    };

    let overdue = balance_due > Decimal::ZERO && loan.due_date.map_or(false, |due| due < now);

    LoanDetails {
        total_paid,
        balance_due,
        status,
        overdue,
    }
}

/// 貸付IDごとの返済額の合計
fn paid_by_loan(repayments: &[Repayment]) -> HashMap<&str, Decimal> {
    let mut totals: HashMap<&str, Decimal> = HashMap::new();
    for repayment in repayments {
        *totals.entry(repayment.loan_id.as_str()).or_default() += repayment.amount;
    }
    totals
}

fn with_details(
    loan: &Loan,
    paid: &HashMap<&str, Decimal>,
    now: DateTime<Utc>,
) -> LoanWithDetails {
    let total_paid = paid.get(loan.id.as_str()).copied().unwrap_or_default();
    LoanWithDetails {
        loan: loan.clone(),
        details: details_from_total(loan, total_paid, now),
    }
}

/// 連絡先の集計を計算する
///
/// 過払いの貸付は負の残高として `total_due` に含まれる。
///
/// # 引数
/// * `contact` - 対象の連絡先
/// * `loans` - 貸付（`contact_id` が一致するものだけが対象）
/// * `repayments` - 返済
/// * `now` - 現在時刻
pub fn compute_contact_summary(
    contact: &Contact,
    loans: &[Loan],
    repayments: &[Repayment],
    now: DateTime<Utc>,
) -> ContactSummary {
    let paid = paid_by_loan(repayments);
    summary_for(contact, loans.iter(), &paid, now)
}

fn summary_for<'a>(
    contact: &Contact,
    loans: impl Iterator<Item = &'a Loan>,
    paid: &HashMap<&str, Decimal>,
    now: DateTime<Utc>,
) -> ContactSummary {
    let mut owned: Vec<&Loan> = loans.filter(|loan| loan.contact_id == contact.id).collect();
    owned.sort_by(|a, b| loan_order(a, b));

    let loans: Vec<LoanWithDetails> = owned
        .into_iter()
        .map(|loan| with_details(loan, paid, now))
        .collect();
    let total_due = loans.iter().map(|entry| entry.details.balance_due).sum();

    ContactSummary {
        contact: contact.clone(),
        loans,
        total_due,
    }
}

/// すべての連絡先の集計を名前順で計算する
pub fn compute_all_summaries(
    contacts: &[Contact],
    loans: &[Loan],
    repayments: &[Repayment],
    now: DateTime<Utc>,
) -> Vec<ContactSummary> {
    let paid = paid_by_loan(repayments);

    let mut by_contact: HashMap<&str, Vec<&Loan>> = HashMap::new();
    for loan in loans {
        by_contact
            .entry(loan.contact_id.as_str())
            .or_default()
            .push(loan);
    }

    let mut ordered: Vec<&Contact> = contacts.iter().collect();
    ordered.sort_by(|a, b| contact_order(a, b));

    ordered
        .into_iter()
        .map(|contact| {
            let owned = by_contact
                .get(contact.id.as_str())
                .map(|loans| loans.as_slice())
                .unwrap_or_default();
            summary_for(contact, owned.iter().copied(), &paid, now)
        })
        .collect()
}

/// 全体の集計を計算する
///
/// 存在しない貸付に対する返済は無視されるため、
/// `total_outstanding == total_loaned - total_repaid` が常に成り立つ。
pub fn compute_global_totals(loans: &[Loan], repayments: &[Repayment]) -> GlobalTotals {
    let loan_ids: HashSet<&str> = loans.iter().map(|loan| loan.id.as_str()).collect();

    let total_loaned: Decimal = loans.iter().map(|loan| loan.amount).sum();
    let total_repaid: Decimal = repayments
        .iter()
        .filter(|repayment| loan_ids.contains(repayment.loan_id.as_str()))
        .map(|repayment| repayment.amount)
        .sum();

    GlobalTotals {
        total_outstanding: total_loaned - total_repaid,
        total_loaned,
        total_repaid,
        loans_count: loans.len(),
    }
}

/// 連絡先が検索語に一致するか
///
/// 名前または電話番号に対する大文字小文字を区別しない部分一致。空の検索語はすべてに一致する。
pub fn matches_query(contact: &Contact, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    contact.name.to_lowercase().contains(&needle)
        || contact
            .phone_number
            .as_deref()
            .map_or(false, |phone| phone.to_lowercase().contains(&needle))
}

/// 検索語で連絡先を絞り込む
pub fn filter_contacts<'a>(contacts: &'a [Contact], query: &str) -> Vec<&'a Contact> {
    contacts
        .iter()
        .filter(|contact| matches_query(contact, query))
        .collect()
}

fn compare_names(a: &ContactSummary, b: &ContactSummary) -> Ordering {
    a.contact
        .name
        .to_lowercase()
        .cmp(&b.contact.name.to_lowercase())
        .then_with(|| a.contact.id.cmp(&b.contact.id))
}

/// 連絡先の集計を並べ替える
///
/// `DueDate` は未完済の貸付のうち最も早い期日で比較し、期日のない連絡先は方向に関係なく末尾に置く。
/// 同順位は名前順。
pub fn sort_contact_summaries(
    summaries: &mut [ContactSummary],
    option: SortOption,
    direction: SortDirection,
) {
    let directed = |ordering: Ordering| match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    };

    summaries.sort_by(|a, b| {
        let primary = match option {
            SortOption::Name => directed(compare_names(a, b)),
            SortOption::Amount => directed(a.total_due.cmp(&b.total_due)),
            SortOption::DueDate => match (a.next_due_date(), b.next_due_date()) {
                (Some(x), Some(y)) => directed(x.cmp(&y)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then_with(|| compare_names(a, b))
    });
}

/// 残高のある連絡先のみを残高の降順で返す
pub fn outstanding_summaries(summaries: Vec<ContactSummary>) -> Vec<ContactSummary> {
    let mut outstanding: Vec<ContactSummary> = summaries
        .into_iter()
        .filter(|summary| summary.total_due > Decimal::ZERO)
        .collect();
    sort_contact_summaries(&mut outstanding, SortOption::Amount, SortDirection::Desc);
    outstanding
}

/// 期日を過ぎている貸付を期日の古い順で返す
pub fn overdue_loans(
    loans: &[Loan],
    repayments: &[Repayment],
    now: DateTime<Utc>,
) -> Vec<LoanWithDetails> {
    let paid = paid_by_loan(repayments);

    let mut overdue: Vec<LoanWithDetails> = loans
        .iter()
        .map(|loan| with_details(loan, &paid, now))
        .filter(|entry| entry.details.overdue)
        .collect();

    overdue.sort_by(|a, b| {
        a.loan
            .due_date
            .cmp(&b.loan.due_date)
            .then_with(|| a.loan.id.cmp(&b.loan.id))
    });
    overdue
}
