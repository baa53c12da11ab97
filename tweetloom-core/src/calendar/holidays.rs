//! Public holidays that fall inside a planning window.
//!
//! [`BuiltinHolidays`] computes the main national holidays for a handful of
//! countries from fixed-date, nth-weekday and Easter-relative rules. Observed
//! substitutes (a holiday moved off a weekend) are not modelled.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Source of public holidays.
pub trait HolidayProvider: Send + Sync {
    /// Holidays in `from..=to`, sorted by date. `None` means the country is unknown.
    fn holidays_between(
        &self,
        country: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Option<Vec<(NaiveDate, String)>>;
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Month, day
    Fixed(u32, u32),
    /// Month, weekday, occurrence (negative counts from the end)
    NthWeekday(u32, Weekday, i32),
    /// Last `weekday` on or before month/day
    WeekdayOnOrBefore(u32, u32, Weekday),
    /// Days relative to Easter Sunday
    Easter(i64),
}

impl Rule {
    fn date_in(self, year: i32) -> Option<NaiveDate> {
        match self {
            Rule::Fixed(month, day) => NaiveDate::from_ymd_opt(year, month, day),
            Rule::NthWeekday(month, weekday, n) => nth_weekday(year, month, weekday, n),
            Rule::WeekdayOnOrBefore(month, day, weekday) => {
                let anchor = NaiveDate::from_ymd_opt(year, month, day)?;
                let back = (anchor.weekday().num_days_from_monday() + 7
                    - weekday.num_days_from_monday())
                    % 7;
                Some(anchor - Duration::days(back as i64))
            }
            Rule::Easter(offset) => Some(easter_sunday(year)? + Duration::days(offset)),
        }
    }
}

const US: &[(Rule, &str)] = &[
    (Rule::Fixed(1, 1), "New Year's Day"),
    (Rule::NthWeekday(1, Weekday::Mon, 3), "Martin Luther King Jr. Day"),
    (Rule::NthWeekday(2, Weekday::Mon, 3), "Washington's Birthday"),
    (Rule::NthWeekday(5, Weekday::Mon, -1), "Memorial Day"),
    (Rule::Fixed(6, 19), "Juneteenth National Independence Day"),
    (Rule::Fixed(7, 4), "Independence Day"),
    (Rule::NthWeekday(9, Weekday::Mon, 1), "Labor Day"),
    (Rule::NthWeekday(10, Weekday::Mon, 2), "Columbus Day"),
    (Rule::Fixed(11, 11), "Veterans Day"),
    (Rule::NthWeekday(11, Weekday::Thu, 4), "Thanksgiving"),
    (Rule::Fixed(12, 25), "Christmas Day"),
];

const GB: &[(Rule, &str)] = &[
    (Rule::Fixed(1, 1), "New Year's Day"),
    (Rule::Easter(-2), "Good Friday"),
    (Rule::Easter(1), "Easter Monday"),
    (Rule::NthWeekday(5, Weekday::Mon, 1), "May Day"),
    (Rule::NthWeekday(5, Weekday::Mon, -1), "Spring Bank Holiday"),
    (Rule::NthWeekday(8, Weekday::Mon, -1), "Late Summer Bank Holiday"),
    (Rule::Fixed(12, 25), "Christmas Day"),
    (Rule::Fixed(12, 26), "Boxing Day"),
];

const CA: &[(Rule, &str)] = &[
    (Rule::Fixed(1, 1), "New Year's Day"),
    (Rule::Easter(-2), "Good Friday"),
    (Rule::WeekdayOnOrBefore(5, 24, Weekday::Mon), "Victoria Day"),
    (Rule::Fixed(7, 1), "Canada Day"),
    (Rule::NthWeekday(9, Weekday::Mon, 1), "Labour Day"),
    (Rule::Fixed(9, 30), "National Day for Truth and Reconciliation"),
    (Rule::NthWeekday(10, Weekday::Mon, 2), "Thanksgiving"),
    (Rule::Fixed(11, 11), "Remembrance Day"),
    (Rule::Fixed(12, 25), "Christmas Day"),
    (Rule::Fixed(12, 26), "Boxing Day"),
];

const AU: &[(Rule, &str)] = &[
    (Rule::Fixed(1, 1), "New Year's Day"),
    (Rule::Fixed(1, 26), "Australia Day"),
    (Rule::Easter(-2), "Good Friday"),
    (Rule::Easter(-1), "Easter Saturday"),
    (Rule::Easter(1), "Easter Monday"),
    (Rule::Fixed(4, 25), "ANZAC Day"),
    (Rule::NthWeekday(6, Weekday::Mon, 2), "King's Birthday"),
    (Rule::Fixed(12, 25), "Christmas Day"),
    (Rule::Fixed(12, 26), "Boxing Day"),
];

const DE: &[(Rule, &str)] = &[
    (Rule::Fixed(1, 1), "New Year's Day"),
    (Rule::Easter(-2), "Good Friday"),
    (Rule::Easter(1), "Easter Monday"),
    (Rule::Fixed(5, 1), "Labour Day"),
    (Rule::Easter(39), "Ascension Day"),
    (Rule::Easter(50), "Whit Monday"),
    (Rule::Fixed(10, 3), "German Unity Day"),
    (Rule::Fixed(12, 25), "Christmas Day"),
    (Rule::Fixed(12, 26), "Second Day of Christmas"),
];

const FR: &[(Rule, &str)] = &[
    (Rule::Fixed(1, 1), "New Year's Day"),
    (Rule::Easter(1), "Easter Monday"),
    (Rule::Fixed(5, 1), "Labour Day"),
    (Rule::Fixed(5, 8), "Victory in Europe Day"),
    (Rule::Easter(39), "Ascension Day"),
    (Rule::Easter(50), "Whit Monday"),
    (Rule::Fixed(7, 14), "Bastille Day"),
    (Rule::Fixed(8, 15), "Assumption Day"),
    (Rule::Fixed(11, 1), "All Saints' Day"),
    (Rule::Fixed(11, 11), "Armistice Day"),
    (Rule::Fixed(12, 25), "Christmas Day"),
];

const JP: &[(Rule, &str)] = &[
    (Rule::Fixed(1, 1), "New Year's Day"),
    (Rule::NthWeekday(1, Weekday::Mon, 2), "Coming of Age Day"),
    (Rule::Fixed(2, 11), "Foundation Day"),
    (Rule::Fixed(2, 23), "The Emperor's Birthday"),
    (Rule::Fixed(4, 29), "Showa Day"),
    (Rule::Fixed(5, 3), "Constitution Memorial Day"),
    (Rule::Fixed(5, 4), "Greenery Day"),
    (Rule::Fixed(5, 5), "Children's Day"),
    (Rule::NthWeekday(7, Weekday::Mon, 3), "Marine Day"),
    (Rule::Fixed(8, 11), "Mountain Day"),
    (Rule::NthWeekday(9, Weekday::Mon, 3), "Respect for the Aged Day"),
    (Rule::NthWeekday(10, Weekday::Mon, 2), "Sports Day"),
    (Rule::Fixed(11, 3), "Culture Day"),
    (Rule::Fixed(11, 23), "Labor Thanksgiving Day"),
];

/// Assigned ISO 3166-1 alpha-2 codes.
const ISO_COUNTRIES: [&str; 249] = [
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT",
    "AU", "AW", "AX", "AZ", "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI",
    "BJ", "BL", "BM", "BN", "BO", "BQ", "BR", "BS", "BT", "BV", "BW", "BY",
    "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK", "CL", "CM", "CN",
    "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM",
    "DO", "DZ", "EC", "EE", "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK",
    "FM", "FO", "FR", "GA", "GB", "GD", "GE", "GF", "GG", "GH", "GI", "GL",
    "GM", "GN", "GP", "GQ", "GR", "GS", "GT", "GU", "GW", "GY", "HK", "HM",
    "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN", "IO", "IQ", "IR",
    "IS", "IT", "JE", "JM", "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN",
    "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC", "LI", "LK", "LR", "LS",
    "LT", "LU", "LV", "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK",
    "ML", "MM", "MN", "MO", "MP", "MQ", "MR", "MS", "MT", "MU", "MV", "MW",
    "MX", "MY", "MZ", "NA", "NC", "NE", "NF", "NG", "NI", "NL", "NO", "NP",
    "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG", "PH", "PK", "PL", "PM",
    "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW",
    "SA", "SB", "SC", "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM",
    "SN", "SO", "SR", "SS", "ST", "SV", "SX", "SY", "SZ", "TC", "TD", "TF",
    "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO", "TR", "TT", "TV", "TW",
    "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];

/// Whether `code` is an assigned ISO 3166-1 alpha-2 country code (`UK` included).
pub fn is_country_code(code: &str) -> bool {
    let code = code.trim().to_ascii_uppercase();
    code == "UK" || ISO_COUNTRIES.binary_search(&code.as_str()).is_ok()
}

/// Rule-based holidays for US, GB, CA, AU, DE, FR and JP.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinHolidays;

impl BuiltinHolidays {
    pub const COUNTRIES: [&'static str; 7] = ["US", "GB", "CA", "AU", "DE", "FR", "JP"];

    fn rules(country: &str) -> Option<&'static [(Rule, &'static str)]> {
        match country.to_ascii_uppercase().as_str() {
            "US" => Some(US),
            "GB" | "UK" => Some(GB),
            "CA" => Some(CA),
            "AU" => Some(AU),
            "DE" => Some(DE),
            "FR" => Some(FR),
            "JP" => Some(JP),
            _ => None,
        }
    }
}

impl HolidayProvider for BuiltinHolidays {
    fn holidays_between(
        &self,
        country: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Option<Vec<(NaiveDate, String)>> {
        let rules = Self::rules(country)?;
        let mut found: Vec<(NaiveDate, String)> = (from.year()..=to.year())
            .flat_map(|year| {
                rules
                    .iter()
                    .filter_map(move |(rule, name)| Some((rule.date_in(year)?, name.to_string())))
            })
            .filter(|(date, _)| *date >= from && *date <= to)
            .collect();
        found.sort();
        Some(found)
    }
}

/// Holiday lookup with a fallback country for invalid codes.
pub struct HolidayCalendar {
    provider: Box<dyn HolidayProvider>,
    fallback_country: String,
}

impl HolidayCalendar {
    pub fn new(provider: Box<dyn HolidayProvider>, fallback_country: impl Into<String>) -> Self {
        Self {
            provider,
            fallback_country: fallback_country.into(),
        }
    }

    pub fn builtin(fallback_country: impl Into<String>) -> Self {
        Self::new(Box::new(BuiltinHolidays), fallback_country)
    }

    pub fn fallback_country(&self) -> &str {
        &self.fallback_country
    }

    /// Holidays for `country`.
    ///
    /// A real country with no rule table has no listed holidays; only a code
    /// that is not an ISO 3166-1 alpha-2 country falls back to the fallback country.
    pub fn between(&self, country: &str, from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDate, String)> {
        if let Some(days) = self.provider.holidays_between(country, from, to) {
            return days;
        }
        if is_country_code(country) {
            tracing::warn!(country, "No holiday rules for country, listing none");
            return Vec::new();
        }
        tracing::warn!(
            country,
            fallback = %self.fallback_country,
            "Invalid country code for holidays, using fallback"
        );
        self.provider
            .holidays_between(&self.fallback_country, from, to)
            .unwrap_or_default()
    }
}

impl Default for HolidayCalendar {
    fn default() -> Self {
        Self::builtin("US")
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: i32) -> Option<NaiveDate> {
    if n > 0 {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let offset = (weekday.num_days_from_monday() + 7 - first.weekday().num_days_from_monday()) % 7;
        let date = first + Duration::days(offset as i64 + 7 * (n as i64 - 1));
        (date.month() == month).then_some(date)
    } else if n < 0 {
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
        let offset = (last.weekday().num_days_from_monday() + 7 - weekday.num_days_from_monday()) % 7;
        let date = last - Duration::days(offset as i64 + 7 * (-n as i64 - 1));
        (date.month() == month).then_some(date)
    } else {
        None
    }
}

/// Gregorian Easter Sunday (anonymous Gregorian algorithm).
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}
