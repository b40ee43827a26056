//! Data model: source reviews, classifier output, and persisted analysis rows.

use serde::{Deserialize, Serialize};

/// A raw product review as stored in the `reviews` table.
///
/// Rows are created once during bulk load and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: i64,
    pub author_id: Option<i64>,
    pub brand_name: Option<String>,
    pub submission_time: Option<i64>,
    pub rating: Option<i64>,
    pub review_title: Option<String>,
    pub review_text: Option<String>,
    pub product_name: Option<String>,
    pub category: Option<String>,
}

/// A review row as produced by the CSV loader, before it has a database id.
#[derive(Debug, Clone)]
pub struct NewReview {
    pub author_id: Option<i64>,
    pub brand_name: Option<String>,
    pub submission_time: Option<i64>,
    pub rating: Option<i64>,
    pub review_title: Option<String>,
    pub review_text: Option<String>,
    pub product_name: Option<String>,
}

/// One classifier verdict, keyed back to the source review by id.
///
/// Decoded strictly: an unknown category or sentiment label fails
/// deserialization instead of being coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: i64,
    pub category: Category,
    pub sentiment: Sentiment,
}

/// Closed set of review categories the classifier may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Effectiveness,
    Quality,
    Price,
    Usability,
    #[serde(rename = "Customer Service")]
    CustomerService,
    Delivery,
    Design,
    Other,
}

impl Category {
    /// All labels, in the order presented to the classifier.
    pub const ALL: [Category; 8] = [
        Category::Effectiveness,
        Category::Quality,
        Category::Price,
        Category::Usability,
        Category::CustomerService,
        Category::Delivery,
        Category::Design,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Effectiveness => "Effectiveness",
            Category::Quality => "Quality",
            Category::Price => "Price",
            Category::Usability => "Usability",
            Category::CustomerService => "Customer Service",
            Category::Delivery => "Delivery",
            Category::Design => "Design",
            Category::Other => "Other",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category label: {:?}", s))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of sentiment labels the classifier may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Sentiment {
    pub const ALL: [Sentiment; 4] = [
        Sentiment::Positive,
        Sentiment::Negative,
        Sentiment::Neutral,
        Sentiment::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
            Sentiment::Mixed => "Mixed",
        }
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sentiment::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown sentiment label: {:?}", s))
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// sqlx codecs: both enums are stored as TEXT in sentiment_analysis.
// Decoding is strict; a row with an out-of-set label is a database error,
// not a silent fallback.

impl sqlx::Type<sqlx::Sqlite> for Category {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Category {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<Category>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Category {
    fn encode_by_ref(
        &self,
        args: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        args.push(sqlx::sqlite::SqliteArgumentValue::Text(
            std::borrow::Cow::Borrowed(self.as_str()),
        ));
        Ok(sqlx::encode::IsNull::No)
    }
}

impl sqlx::Type<sqlx::Sqlite> for Sentiment {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Sentiment {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<Sentiment>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Sentiment {
    fn encode_by_ref(
        &self,
        args: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        args.push(sqlx::sqlite::SqliteArgumentValue::Text(
            std::borrow::Cow::Borrowed(self.as_str()),
        ));
        Ok(sqlx::encode::IsNull::No)
    }
}

/// A classifier verdict merged with the denormalized fields of its source
/// review. One row per review id in `sentiment_analysis`, append-only.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnalyzedReview {
    pub id: i64,
    pub author_id: Option<i64>,
    pub category: Category,
    pub sentiment: Sentiment,
    pub product_name: Option<String>,
    pub review_text: Option<String>,
    pub submission_time: Option<i64>,
}

impl AnalyzedReview {
    /// Merge one classifier result with its matching source review.
    pub fn merge(review: &Review, result: &AnalysisResult) -> Self {
        Self {
            id: review.id,
            author_id: review.author_id,
            category: result.category,
            sentiment: result.sentiment,
            product_name: review.product_name.clone(),
            review_text: review.review_text.clone(),
            submission_time: review.submission_time,
        }
    }
}
