use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    Individual,
    Corporate,
}

impl BillingType {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingType::Individual => "individual",
            BillingType::Corporate => "corporate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillingInfo {
    pub billing_type: BillingType,
    pub national_id: Option<String>,
    pub tax_id: Option<String>,
    pub tax_office: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("A valid 11-digit national id is required for individual billing")]
    InvalidNationalId,
    #[error("A valid 10-digit tax id is required for corporate billing")]
    InvalidTaxId,
    #[error("Company name is required for corporate billing")]
    MissingCompanyName,
    #[error("Phone number must be a valid mobile number")]
    InvalidPhone,
}

/// The tax id (and the national id standing in for it) recorded on the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBilling {
    pub billing_type: BillingType,
    pub tax_id: String,
    pub tax_office: Option<String>,
    pub company_name: Option<String>,
}

impl BillingInfo {
    pub fn validate(&self) -> Result<ValidatedBilling, BillingError> {
        match self.billing_type {
            BillingType::Individual => {
                let national_id = self
                    .national_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| is_valid_national_id(id))
                    .ok_or(BillingError::InvalidNationalId)?;
                Ok(ValidatedBilling {
                    billing_type: BillingType::Individual,
                    tax_id: national_id.to_string(),
                    tax_office: None,
                    company_name: None,
                })
            }
            BillingType::Corporate => {
                let tax_id = self
                    .tax_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| is_valid_tax_id(id))
                    .ok_or(BillingError::InvalidTaxId)?;
                let company_name = self
                    .company_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or(BillingError::MissingCompanyName)?;
                Ok(ValidatedBilling {
                    billing_type: BillingType::Corporate,
                    tax_id: tax_id.to_string(),
                    tax_office: self.tax_office.clone(),
                    company_name: Some(company_name.to_string()),
                })
            }
        }
    }
}

/// 11 digits, no leading zero. Digit 10 is `(7 * odd(1..9) - even(2..8)) mod 10`,
/// digit 11 is `sum(1..10) mod 10`.
pub fn is_valid_national_id(value: &str) -> bool {
    let digits: Vec<u32> = match value.chars().map(|c| c.to_digit(10)).collect() {
        Some(digits) => digits,
        None => return false,
    };
    if digits.len() != 11 || digits[0] == 0 {
        return false;
    }

    let odd: i64 = digits[..9].iter().step_by(2).map(|d| *d as i64).sum();
    let even: i64 = digits[1..8].iter().step_by(2).map(|d| *d as i64).sum();
    let tenth = (odd * 7 - even).rem_euclid(10);
    let eleventh = (digits[..10].iter().map(|d| *d as i64).sum::<i64>()).rem_euclid(10);

    tenth == digits[9] as i64 && eleventh == digits[10] as i64
}

pub fn is_valid_tax_id(value: &str) -> bool {
    value.len() == 10 && value.chars().all(|c| c.is_ascii_digit())
}

/// Normalises a local mobile number to `5XXXXXXXXX`.
///
/// Accepts an optional `+90`, `90` or `0` prefix and ignores spaces, dashes
/// and parentheses.
pub fn normalize_mobile_phone(value: &str) -> Result<String, BillingError> {
    let compact: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let local = compact
        .strip_prefix("+90")
        .or_else(|| compact.strip_prefix("90").filter(|rest| rest.len() == 10))
        .or_else(|| compact.strip_prefix('0'))
        .unwrap_or(&compact);

    let valid = local.len() == 10
        && local.starts_with('5')
        && local.chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(local.to_string())
    } else {
        Err(BillingError::InvalidPhone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(prefix: &str) -> String {
        let digits: Vec<i64> = prefix
            .chars()
            .map(|c| c.to_digit(10).unwrap() as i64)
            .collect();
        let odd: i64 = digits.iter().step_by(2).sum();
        let even: i64 = digits[1..8].iter().step_by(2).sum();
        let tenth = (odd * 7 - even).rem_euclid(10);
        let eleventh = (digits.iter().sum::<i64>() + tenth).rem_euclid(10);
        format!("{prefix}{tenth}{eleventh}")
    }

    #[test]
    fn arbitrary_digits_fail_national_id_checksum() {
        assert!(!is_valid_national_id("12345678901"));
    }

    #[test]
    fn constructed_national_id_passes() {
        let id = with_checksum("123456789");
        assert_eq!(id, "12345678950");
        assert!(is_valid_national_id(&id));
        assert!(is_valid_national_id("10000000146"));
        assert!(is_valid_national_id(&with_checksum("987654321")));
    }

    #[test]
    fn national_id_shape_is_enforced() {
        assert!(!is_valid_national_id("02345678950"));
        assert!(!is_valid_national_id("1234567895"));
        assert!(!is_valid_national_id("1234567895a"));
    }

    #[test]
    fn corporate_billing_needs_tax_id_and_company() {
        let mut info = BillingInfo {
            billing_type: BillingType::Corporate,
            national_id: None,
            tax_id: Some("1234567890".into()),
            tax_office: Some("Kadikoy".into()),
            company_name: None,
        };
        assert_eq!(info.validate(), Err(BillingError::MissingCompanyName));

        info.company_name = Some("Acme Ltd".into());
        let validated = info.validate().unwrap();
        assert_eq!(validated.tax_id, "1234567890");

        info.tax_id = Some("12345".into());
        assert_eq!(info.validate(), Err(BillingError::InvalidTaxId));
    }

    #[test]
    fn individual_billing_uses_national_id() {
        let info = BillingInfo {
            billing_type: BillingType::Individual,
            national_id: Some("12345678901".into()),
            tax_id: None,
            tax_office: None,
            company_name: None,
        };
        assert_eq!(info.validate(), Err(BillingError::InvalidNationalId));
    }

    #[test]
    fn mobile_numbers_are_normalised() {
        assert_eq!(normalize_mobile_phone("0532 123 45 67").unwrap(), "5321234567");
        assert_eq!(normalize_mobile_phone("+90 (532) 123-4567").unwrap(), "5321234567");
        assert_eq!(normalize_mobile_phone("5321234567").unwrap(), "5321234567");
        assert!(normalize_mobile_phone("0212 123 45 67").is_err());
        assert!(normalize_mobile_phone("53212345").is_err());
    }
}
