use p4kit::core::diff::{DiffTag, common_prefix, common_suffix, compute, diff_lines};
use proptest::prelude::*;

/// Length of the longest common subsequence, by table.
fn lcs_len(
    a: &[String],
    b: &[String],
) -> usize
{
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev()
    {
        for j in (0..b.len()).rev()
        {
            table[i][j] = if a[i] == b[j]
            {
                table[i + 1][j + 1] + 1
            }
            else
            {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    table[0][0]
}

/// Short lines from a tiny alphabet so sequences share plenty of lines.
fn lines() -> impl Strategy<Value = Vec<String>>
{
    prop::collection::vec("[abc]{0,2}", 0..14)
}

proptest! {
    #[test]
    fn script_rebuilds_both_sides(from in lines(), to in lines())
    {
        let script = diff_lines(&from, &to).unwrap();

        let left: Vec<&str> = script
            .iter()
            .filter(|l| l.tag != DiffTag::Insert)
            .map(|l| l.text.as_str())
            .collect();
        let right: Vec<&str> = script
            .iter()
            .filter(|l| l.tag != DiffTag::Delete)
            .map(|l| l.text.as_str())
            .collect();

        prop_assert_eq!(left, from.iter().map(String::as_str).collect::<Vec<_>>());
        prop_assert_eq!(right, to.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn script_is_minimal(from in lines(), to in lines())
    {
        let script = diff_lines(&from, &to).unwrap();
        let edits = script
            .iter()
            .filter(|l| l.tag != DiffTag::Equal)
            .count();
        prop_assert_eq!(edits, from.len() + to.len() - 2 * lcs_len(&from, &to));
    }

    #[test]
    fn identical_inputs_are_all_equal(same in lines())
    {
        let script = diff_lines(&same, &same).unwrap();
        prop_assert_eq!(script.len(), same.len());
        prop_assert!(script.iter().all(|l| l.tag == DiffTag::Equal));
    }

    #[test]
    fn text_script_has_one_line_per_entry(from in lines(), to in lines())
    {
        let from_text = from.join("\n");
        let to_text = to.join("\n");
        let text = compute(&from_text, &to_text).unwrap();
        let entries = if text.is_empty() { 0 } else { text.split('\n').count() };

        let from_lines = if from_text.is_empty() { 0 } else { from_text.split('\n').count() };
        prop_assert!(entries >= from_lines);
        prop_assert!(text.split('\n').filter(|l| !l.is_empty()).all(|l| matches!(&l[..1], "+" | "-" | "=")));
    }

    #[test]
    fn trimmed_ends_really_match(from in lines(), to in lines())
    {
        let p = common_prefix(&from, &to);
        let s = common_suffix(&from[p..], &to[p..]);

        prop_assert_eq!(&from[..p], &to[..p]);
        prop_assert_eq!(&from[from.len() - s..], &to[to.len() - s..]);
        prop_assert!(p + s <= from.len().min(to.len()));
        if from != to
        {
            prop_assert!(p + s < from.len().max(to.len()));
        }
    }
}
