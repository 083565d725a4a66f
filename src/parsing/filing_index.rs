//! Per-filing HTML index pages
//!
//! The page lists every document of a filing in a table with the columns
//! Seq, Description, Document, Type and Size.

use super::ParseError;
use scraper::{ElementRef, Html, Selector};

/// One row of the document table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    pub description: String,
    pub filename: String,
    /// Upper-cased document type, e.g. `10-K` or `EX-33`
    pub doc_type: String,
}

impl IndexDocument {
    /// Whether the document is in a rich (HTML) format
    pub fn is_html(&self) -> bool {
        let name = self.filename.to_ascii_lowercase();
        name.ends_with(".htm") || name.ends_with(".html")
    }
}

/// Extract the document table from an index page
pub fn parse_filing_index(html: &str) -> Result<Vec<IndexDocument>, ParseError> {
    let document = Html::parse_document(html);

    let table = ["table.tableFile", r#"table[summary="Document Format Files"]"#]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| document.select(&selector).next())
        .ok_or(ParseError::MissingDocumentTable)?;

    let (Ok(row_sel), Ok(cell_sel), Ok(link_sel)) =
        (Selector::parse("tr"), Selector::parse("td"), Selector::parse("a"))
    else {
        return Err(ParseError::MissingDocumentTable);
    };

    let documents = table
        .select(&row_sel)
        .filter_map(|row| {
            let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
            // Header row uses <th> and has no data cells
            if cells.len() < 4 {
                return None;
            }

            let filename_text = cells[2]
                .select(&link_sel)
                .next()
                .map(text_of)
                .unwrap_or_else(|| text_of(cells[2]));
            // iXBRL documents carry a trailing marker after the name
            let filename = filename_text
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();

            Some(IndexDocument {
                description: text_of(cells[1]),
                filename,
                doc_type: text_of(cells[3]).to_uppercase(),
            })
        })
        .collect();

    Ok(documents)
}

/// Whether any document's type starts with one of `prefixes`
pub fn has_excluded_exhibit(documents: &[IndexDocument], prefixes: &[String]) -> bool {
    documents
        .iter()
        .any(|doc| prefixes.iter().any(|p| doc.doc_type.starts_with(p.as_str())))
}

/// First HTML document whose type is one of `forms`
pub fn primary_document<'a>(documents: &'a [IndexDocument], forms: &[String]) -> Option<&'a IndexDocument> {
    documents
        .iter()
        .find(|doc| doc.is_html() && forms.iter().any(|f| f.eq_ignore_ascii_case(&doc.doc_type)))
}

fn text_of(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABS_INDEX_PAGE: &str = r#"
<html><body>
<div id="formDiv">
<table class="tableFile" summary="Document Format Files">
  <tr><th scope="col">Seq</th><th scope="col">Description</th><th scope="col">Document</th><th scope="col">Type</th><th scope="col">Size</th></tr>
  <tr><td scope="row">1</td><td scope="row">ANNUAL REPORT</td><td scope="row"><a href="/Archives/edgar/data/1/000000000124000001/trust-10k.htm">trust-10k.htm</a></td><td scope="row">10-K</td><td scope="row">120000</td></tr>
  <tr><td scope="row">2</td><td scope="row">SERVICER COMPLIANCE</td><td scope="row"><a href="/Archives/edgar/data/1/000000000124000001/ex33.htm">ex33.htm</a></td><td scope="row">EX-33.1</td><td scope="row">4000</td></tr>
  <tr><td scope="row">&nbsp;</td><td scope="row">Complete submission text file</td><td scope="row"><a href="/Archives/edgar/data/1/000000000124000001/0000000001-24-000001.txt">0000000001-24-000001.txt</a></td><td scope="row">&nbsp;</td><td scope="row">200000</td></tr>
</table>
</div>
</body></html>
"#;

    fn prefixes() -> Vec<String> {
        ["EX-33", "EX-34", "EX-35", "EX-1122", "EX-1123"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_parse_document_table() {
        let docs = parse_filing_index(ABS_INDEX_PAGE).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].filename, "trust-10k.htm");
        assert_eq!(docs[0].doc_type, "10-K");
        assert_eq!(docs[1].doc_type, "EX-33.1");
        assert!(docs[2].doc_type.is_empty());
    }

    #[test]
    fn test_exhibit_exclusion_and_primary() {
        let docs = parse_filing_index(ABS_INDEX_PAGE).unwrap();
        assert!(has_excluded_exhibit(&docs, &prefixes()));

        let primary = primary_document(&docs, &["10-K".to_string()]).unwrap();
        assert_eq!(primary.filename, "trust-10k.htm");
        assert!(primary_document(&docs, &["10-Q".to_string()]).is_none());
    }

    #[test]
    fn test_summary_attribute_fallback_and_ixbrl_marker() {
        let html = r#"<table summary="Document Format Files">
            <tr><th>Seq</th><th>Description</th><th>Document</th><th>Type</th></tr>
            <tr><td>1</td><td>10-K</td><td><a href="x">aapl-20230930.htm</a> <span>iXBRL</span></td><td>10-k</td></tr>
            <tr><td>2</td><td>EXHIBIT 21</td><td>ex21.txt</td><td>EX-21.1</td></tr>
        </table>"#;
        let docs = parse_filing_index(html).unwrap();
        assert_eq!(docs[0].filename, "aapl-20230930.htm");
        assert_eq!(docs[0].doc_type, "10-K");
        assert_eq!(docs[1].filename, "ex21.txt");
        assert!(!has_excluded_exhibit(&docs, &prefixes()));
    }

    #[test]
    fn test_missing_table() {
        let result = parse_filing_index("<html><body><p>Not here</p></body></html>");
        assert!(matches!(result, Err(ParseError::MissingDocumentTable)));
    }
}
